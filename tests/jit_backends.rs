//! Compiled artifacts against the graph interpreter.
//!
//! The in-process backend runs wherever it is supported. Backends that shell
//! out to an assembler or compiler are skipped when their tools are not on
//! `PATH`.

use std::process::Command;
use std::thread;

use approx::assert_relative_eq;
use gradjit::config::JitConfig;
use gradjit::function::Blueprint;
use gradjit::{Backend, CompiledFunction, CompiledGradient, Context, Function, Gradient, Objective, Scalar};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use test_log::test;

/// Touches every operation and every function the code generators emit.
struct Everything;

impl Objective for Everything {
    fn evaluate<S: Scalar>(&self, x: &[S]) -> S {
        let a = x[0].sin() * x[1].cos() + x[2].tan() / (x[0].exp() + 1.0);
        let b = (x[0] * 0.5).asin() - (x[1] * 0.5).acos() + (x[2] * 4.0).atan();
        let c = (x[1].sqr() + 1.0).sqrt() * (x[2] + 2.0).log();
        let d = (x[0] - x[1]).ramp() + (x[1] - x[2]).unit_step() * 3.0;
        a + b - c + d
    }
}

/// Differentiable subset of [`Everything`].
struct Smooth;

impl Objective for Smooth {
    fn evaluate<S: Scalar>(&self, x: &[S]) -> S {
        let a = x[0].sin() * x[1].cos() + x[2].tan() / (x[0].exp() + 1.0);
        let b = (x[0] * 0.5).asin() - (x[1] * 0.5).acos() + (x[2] * 4.0).atan();
        a * b + (x[1].sqr() + 1.0).sqrt() * (x[2] + 2.0).log()
    }
}

fn tool_responds(program: &str) -> bool {
    let flag = if program == "nasm" { "-v" } else { "--version" };
    Command::new(program)
        .arg(flag)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Backends that can build on this machine.
fn available_backends(config: &JitConfig) -> Vec<Backend> {
    Backend::ALL
        .into_iter()
        .filter(|&backend| {
            let available = match backend {
                Backend::X64Native => cfg!(all(target_arch = "x86_64", unix)),
                Backend::Clang => {
                    cfg!(unix) && config.commands(backend).iter().all(|step| tool_responds(&step[0]))
                }
                Backend::Nasm | Backend::GnuAs => {
                    cfg!(all(target_arch = "x86_64", target_os = "linux"))
                        && config.commands(backend).iter().all(|step| tool_responds(&step[0]))
                }
            };
            if !available {
                info!("Skipping {backend}: not supported here or toolchain missing");
            }
            available
        })
        .collect()
}

fn sample_points(count: usize) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|_| (0..3).map(|_| rng.gen_range(-0.9..0.9)).collect())
        .collect()
}

// ============================================================================
// Agreement with the interpreter
// ============================================================================

#[test]
fn every_backend_matches_the_interpreter() {
    let config = JitConfig::default();
    let context = Context::new(3).unwrap();
    let root = Everything.evaluate(&context.x()).index();
    let blueprint = Blueprint::new(context.graph(), root);
    let points = sample_points(50);

    for backend in available_backends(&config) {
        let compiled = CompiledFunction::try_compile(context.graph(), root, backend, &config)
            .unwrap_or_else(|err| panic!("{backend} failed to compile: {err}"));
        assert_eq!(compiled.dim(), 3);
        let mut scratch = compiled.scratch();
        for x in &points {
            let expected = blueprint.eval(x);
            let actual = compiled.eval(x, &mut scratch);
            assert_relative_eq!(actual, expected, max_relative = 1e-12, epsilon = 1e-14);
        }
    }
}

#[test]
fn every_backend_matches_the_interpreted_gradient() {
    let config = JitConfig::default();
    let context = Context::new(3).unwrap();
    let root = Smooth.evaluate(&context.x()).index();
    let partials = context.graph().gradient(root).unwrap();
    let interpreted = Gradient::try_new(context.graph(), root, None, &config).unwrap();
    let points = sample_points(20);

    for backend in available_backends(&config) {
        let compiled =
            CompiledGradient::try_compile(context.graph(), root, &partials, backend, &config)
                .unwrap_or_else(|err| panic!("{backend} failed to compile: {err}"));
        let mut scratch = compiled.scratch();
        for x in &points {
            let mut expected = [0.0; 3];
            let mut actual = [0.0; 3];
            let expected_value = interpreted.eval(x, &mut [], &mut expected);
            let actual_value = compiled.eval(x, &mut scratch, &mut actual);
            assert_relative_eq!(actual_value, expected_value, max_relative = 1e-12, epsilon = 1e-14);
            for (a, e) in actual.iter().zip(&expected) {
                assert_relative_eq!(*a, *e, max_relative = 1e-12, epsilon = 1e-14);
            }
        }
    }
}

#[test]
fn kinks_compile_like_they_interpret() {
    let config = JitConfig::default();
    let context = Context::new(1).unwrap();
    let x = context.var(0);
    let root = (x.unit_step() * 10.0 + x.ramp()).index();
    let blueprint = Blueprint::new(context.graph(), root);

    for backend in available_backends(&config) {
        let compiled = CompiledFunction::try_compile(context.graph(), root, backend, &config).unwrap();
        for value in [-2.0, -0.0, 0.0, 0.5, 3.0] {
            assert_eq!(compiled.call(&[value]), blueprint.eval(&[value]), "{backend} at {value}");
        }
        assert_eq!(compiled.call(&[f64::NAN]), 0.0, "{backend} at NaN");
    }
}

// ============================================================================
// Native artifacts
// ============================================================================

#[cfg(all(target_arch = "x86_64", unix))]
mod native {
    use super::*;
    use test_log::test;

    fn native_config() -> JitConfig {
        JitConfig {
            backend: Some(Backend::X64Native),
            ..JitConfig::default()
        }
    }

    #[test]
    fn repeated_calls_are_bit_identical() {
        let context = Context::new(3).unwrap();
        let root = Everything.evaluate(&context.x()).index();
        let compiled =
            CompiledFunction::try_compile(context.graph(), root, Backend::X64Native, &native_config()).unwrap();
        let mut scratch = compiled.scratch();
        for x in sample_points(10) {
            let first = compiled.eval(&x, &mut scratch);
            let second = compiled.eval(&x, &mut scratch);
            let fresh = compiled.call(&x);
            assert_eq!(first.to_bits(), second.to_bits());
            assert_eq!(first.to_bits(), fresh.to_bits());
        }
    }

    #[test]
    fn artifacts_outlive_their_context() {
        let config = native_config();
        let (function, gradient) = {
            let context = Context::new(2).unwrap();
            let x = context.x();
            let root = ((x[0] + 1.0).sqr() + (x[1] + 2.0).sqr()).index();
            let function = Function::try_new(context.graph(), root, config.backend, &config)
                .unwrap()
                .into_compiled()
                .unwrap();
            let gradient = Gradient::try_new(context.graph(), root, config.backend, &config)
                .unwrap()
                .into_compiled()
                .unwrap();
            (function, gradient)
        };
        assert!(!Context::is_active());
        assert_eq!(function.call(&[0.0, 0.0]), 5.0);
        assert_eq!(gradient.call(&[0.0, 0.0]), vec![2.0, 4.0]);
    }

    #[test]
    fn interpreted_functions_cannot_be_detached() {
        let context = Context::new(1).unwrap();
        let root = context.var(0).sin().index();
        let function = Function::try_new(context.graph(), root, None, &JitConfig::default()).unwrap();
        assert!(function.into_compiled().is_none());
    }

    #[test]
    fn one_artifact_serves_many_threads() {
        let context = Context::new(3).unwrap();
        let root = Smooth.evaluate(&context.x()).index();
        let blueprint = Blueprint::new(context.graph(), root);
        let points = sample_points(16);
        let expected: Vec<f64> = points.iter().map(|x| blueprint.eval(x)).collect();
        let compiled =
            CompiledFunction::try_compile(context.graph(), root, Backend::X64Native, &native_config()).unwrap();

        thread::scope(|scope| {
            for chunk in points.chunks(4).zip(expected.chunks(4)) {
                let compiled = &compiled;
                scope.spawn(move || {
                    let mut scratch = compiled.scratch();
                    for (x, e) in chunk.0.iter().zip(chunk.1) {
                        for _ in 0..100 {
                            assert_eq!(compiled.eval(x, &mut scratch).to_bits(), e.to_bits());
                        }
                    }
                });
            }
        });
    }

    #[test]
    fn deep_expressions_compile() {
        let context = Context::new(2).unwrap();
        let x = context.var(0);
        let y = context.var(1);
        let mut sum = x * 0.0;
        for i in 0..20_000 {
            sum += if i % 2 == 0 { x } else { y.sin() };
        }
        let compiled =
            CompiledFunction::try_compile(context.graph(), sum.index(), Backend::X64Native, &native_config()).unwrap();
        let expected = sum.eval(&[1.0, 0.5]);
        assert_relative_eq!(compiled.call(&[1.0, 0.5]), expected, max_relative = 1e-12);
        assert!(compiled.heap_size() >= context.graph().len() / 2);
    }

    #[test]
    #[should_panic(expected = "expected 2 inputs")]
    fn wrong_input_length_panics() {
        let context = Context::new(2).unwrap();
        let x = context.x();
        let root = (x[0] * x[1]).index();
        let compiled =
            CompiledFunction::try_compile(context.graph(), root, Backend::X64Native, &native_config()).unwrap();
        compiled.call(&[1.0]);
    }
}
