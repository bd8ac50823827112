//! External assembler / compiler / linker driver.
//!
//! Source is written into a fresh temporary directory, each configured
//! command line runs to completion, and the resulting shared object is
//! loaded with `libloading`. The directory lives as long as the library.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Instant;

use libloading::Library;
use log::debug;
use tempfile::TempDir;

use super::schedule::Schedule;
use super::{source, Backend};
use crate::config::JitConfig;
use crate::error::JitError;
use crate::graph::NodeIndex;

type DimFn = unsafe extern "C" fn() -> i64;
type EvalFn = unsafe extern "C" fn(*const f64, *mut f64) -> f64;

/// A loaded `dim` / `heap_size` / `eval_*` library.
pub struct SharedLibrary {
    eval: EvalFn,
    dim: usize,
    heap_size: usize,
    backend: Backend,
    // Dropped in declaration order: unload before deleting the files.
    _library: Library,
    _workdir: TempDir,
}

impl std::fmt::Debug for SharedLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedLibrary")
            .field("backend", &self.backend)
            .field("dim", &self.dim)
            .field("heap_size", &self.heap_size)
            .field("workdir", &self._workdir.path())
            .finish()
    }
}

fn substitute(arg: &str, src: &Path, obj: &Path, lib: &Path) -> String {
    arg.replace("{src}", &src.to_string_lossy())
        .replace("{obj}", &obj.to_string_lossy())
        .replace("{lib}", &lib.to_string_lossy())
}

/// Runs one command line, blocking until it exits.
pub fn run(args: &[String]) -> Result<(), JitError> {
    let command = args.join(" ");
    let Some((program, rest)) = args.split_first() else {
        return Err(JitError::Spawn {
            command,
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command line"),
        });
    };
    debug!("Running `{command}`");
    let output = Command::new(program)
        .args(rest)
        .output()
        .map_err(|source| JitError::Spawn {
            command: command.clone(),
            source,
        })?;
    if !output.status.success() {
        return Err(JitError::Toolchain {
            command,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}

/// Emits source for `backend`, builds it, and loads the result.
pub fn build(
    backend: Backend,
    schedule: &Schedule,
    result: NodeIndex,
    entry: &'static str,
    dim: usize,
    config: &JitConfig,
) -> Result<SharedLibrary, JitError> {
    if !cfg!(unix) || (backend != Backend::Clang && !cfg!(all(target_arch = "x86_64", target_os = "linux"))) {
        return Err(JitError::UnsupportedTarget(backend.name()));
    }

    let (text, extension) = match backend {
        Backend::Nasm => (source::nasm(schedule, entry, result, dim), "asm"),
        Backend::GnuAs => (source::gnu_as(schedule, entry, result, dim), "s"),
        Backend::Clang => (source::c(schedule, entry, result, dim), "c"),
        Backend::X64Native => return Err(JitError::UnsupportedTarget("native")),
    };

    let mut builder = tempfile::Builder::new();
    builder.prefix("gradjit-");
    let workdir = match &config.work_dir {
        Some(dir) => builder.tempdir_in(dir),
        None => builder.tempdir(),
    }
    .map_err(|source| JitError::Io {
        path: config.work_dir.clone().unwrap_or_else(std::env::temp_dir),
        source,
    })?;

    let src = workdir.path().join(format!("{entry}.{extension}"));
    let obj = workdir.path().join(format!("{entry}.o"));
    let lib = workdir.path().join(format!("{entry}.so"));
    fs::write(&src, text).map_err(|source| JitError::Io {
        path: src.clone(),
        source,
    })?;

    let started = Instant::now();
    for step in config.commands(backend) {
        let args: Vec<String> = step.iter().map(|arg| substitute(arg, &src, &obj, &lib)).collect();
        run(&args)?;
    }
    debug!(
        "{} toolchain built {} nodes in {:?}",
        backend.name(),
        schedule.steps.len(),
        started.elapsed()
    );

    SharedLibrary::open(&lib, entry, backend, workdir)
}

impl SharedLibrary {
    fn open(path: &Path, entry: &'static str, backend: Backend, workdir: TempDir) -> Result<Self, JitError> {
        // SAFETY: the library is one we just built; its initializers are the
        // toolchain defaults and it exports plain C functions.
        let library = unsafe { Library::new(path) }.map_err(|source| JitError::LibraryLoad {
            path: path.to_path_buf(),
            source,
        })?;

        // SAFETY: symbol types match the emitted definitions. The copied
        // function pointers are only used while `library` is loaded.
        let (dim, heap_size, eval) = unsafe {
            let dim = *library
                .get::<DimFn>(b"dim\0")
                .map_err(|_| JitError::MissingSymbol("dim"))?;
            let heap_size = *library
                .get::<DimFn>(b"heap_size\0")
                .map_err(|_| JitError::MissingSymbol("heap_size"))?;
            let eval = *library
                .get::<EvalFn>(entry.as_bytes())
                .map_err(|_| JitError::MissingSymbol(entry))?;
            (dim(), heap_size(), eval)
        };

        Ok(SharedLibrary {
            eval,
            dim: dim as usize,
            heap_size: heap_size as usize,
            backend,
            _library: library,
            _workdir: workdir,
        })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn heap_size(&self) -> usize {
        self.heap_size
    }

    pub fn eval(&self, x: &[f64], scratch: &mut [f64]) -> f64 {
        assert_eq!(x.len(), self.dim, "expected {} inputs", self.dim);
        assert!(
            scratch.len() >= self.heap_size,
            "scratch holds {} slots, need {}",
            scratch.len(),
            self.heap_size
        );
        // SAFETY: the library reported `dim` and `heap_size`, both checked
        // above, and stays loaded for the lifetime of `self`.
        unsafe { (self.eval)(x.as_ptr(), scratch.as_mut_ptr()) }
    }
}
