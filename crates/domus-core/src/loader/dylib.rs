//! Native modules loaded from shared libraries.
//!
//! # ABI
//!
//! A native module exports at least one entry point:
//!
//! ```text
//! int domus_module_main(int argc, const char *const *argv);  // takes parameters
//! int domus_module_start(void);                               // takes none
//! void domus_module_tick(void);                               // optional
//! ```
//!
//! `domus_module_main` is preferred when both are present. If
//! `domus_module_tick` is exported it becomes the context's tick handler for
//! as long as the context is live. Entry points must not unwind across the
//! boundary.

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libc::{c_char, c_int};
use libloading::Library;

use crate::context::ContextHandle;
use crate::error::{BoxError, CauseChain, Error, Result};
use crate::handlers::tick_handler;

use super::{Module, ModuleResolver};

/// Parameterized entry point symbol.
pub const MAIN_SYMBOL: &str = "domus_module_main";
/// Parameterless entry point symbol.
pub const START_SYMBOL: &str = "domus_module_start";
/// Optional tick callback symbol.
pub const TICK_SYMBOL: &str = "domus_module_tick";

type MainFn = unsafe extern "C" fn(c_int, *const *const c_char) -> c_int;
type StartFn = unsafe extern "C" fn() -> c_int;
type TickFn = unsafe extern "C" fn();

/// Platform file name of the library for a logical module name
/// (`libname.so`, `libname.dylib`, `name.dll`).
pub fn library_file_name(name: &str) -> String {
    format!(
        "{}{}{}",
        std::env::consts::DLL_PREFIX,
        name,
        std::env::consts::DLL_SUFFIX
    )
}

/// Absolute path of the library file a by-path identifier names.
///
/// A relative identifier is taken relative to the current directory. It is
/// never handed to the loader as is: the platform loader would search the
/// system library paths for a bare file name instead.
fn library_path(module_ref: &str) -> Result<PathBuf> {
    let not_found = |causes| Error::ModuleNotFound {
        module: module_ref.to_string(),
        causes,
    };

    let path = PathBuf::from(module_ref);
    if !path.is_file() {
        return Err(not_found(CauseChain::from_message(format!(
            "no library file at {}",
            path.display()
        ))));
    }
    path.canonicalize()
        .map_err(|e| not_found(CauseChain::from_error(&e)))
}

enum Lookup {
    Path,
    Name(Vec<PathBuf>),
}

/// Resolves native modules, either by file path or by logical name over a
/// list of module directories.
pub struct DylibResolver {
    lookup: Lookup,
}

impl DylibResolver {
    /// Treat the module identifier as a path to a shared library.
    pub fn by_path() -> Self {
        Self {
            lookup: Lookup::Path,
        }
    }

    /// Treat the module identifier as a logical name searched in `module_dirs`,
    /// in order.
    pub fn by_name(module_dirs: Vec<PathBuf>) -> Self {
        Self {
            lookup: Lookup::Name(module_dirs),
        }
    }

    /// Candidate paths for a logical name, in search order.
    fn candidates(dirs: &[PathBuf], name: &str) -> Vec<PathBuf> {
        let file_name = library_file_name(name);
        dirs.iter()
            .flat_map(|dir| [dir.join(&file_name), dir.join(name)])
            .collect()
    }
}

impl ModuleResolver for DylibResolver {
    fn resolve(&self, module_ref: &str) -> Result<Arc<dyn Module>> {
        let path = match &self.lookup {
            Lookup::Path => library_path(module_ref)?,
            Lookup::Name(dirs) => Self::candidates(dirs, module_ref)
                .into_iter()
                .find(|candidate| candidate.is_file())
                .ok_or_else(|| Error::ModuleNotFound {
                    module: module_ref.to_string(),
                    causes: CauseChain::from_message(format!(
                        "{} not found in module directories [{}]",
                        library_file_name(module_ref),
                        dirs.iter()
                            .map(|d| d.display().to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    )),
                })?,
        };

        Ok(Arc::new(DylibModule::open(module_ref, &path)?))
    }
}

/// A loaded native module.
///
/// The library stays mapped while the module, or a tick handler it
/// registered, is alive.
pub struct DylibModule {
    library: Arc<Library>,
    path: PathBuf,
    main: Option<MainFn>,
    start: Option<StartFn>,
    tick: Option<TickFn>,
}

impl DylibModule {
    /// Load the library at `path` and look up its entry points.
    pub fn open(module_ref: &str, path: &Path) -> Result<Self> {
        let load_failed = |causes| Error::ModuleLoadFailed {
            module: module_ref.to_string(),
            causes,
        };

        // Safety: loading a library runs its initializers. Module libraries
        // are trusted code by contract.
        let library = unsafe { Library::new(path) }
            .map_err(|e| load_failed(CauseChain::from_error(&e)))?;

        // Safety: the symbol types follow the module ABI documented above.
        // The raw function pointers are kept together with `library`, so they
        // never outlive the mapping.
        let main = unsafe { library.get::<MainFn>(MAIN_SYMBOL.as_bytes()) }
            .ok()
            .map(|symbol| *symbol);
        let start = unsafe { library.get::<StartFn>(START_SYMBOL.as_bytes()) }
            .ok()
            .map(|symbol| *symbol);
        let tick = unsafe { library.get::<TickFn>(TICK_SYMBOL.as_bytes()) }
            .ok()
            .map(|symbol| *symbol);

        if main.is_none() && start.is_none() {
            return Err(load_failed(CauseChain::from_message(format!(
                "{} exports neither {} nor {}",
                path.display(),
                MAIN_SYMBOL,
                START_SYMBOL
            ))));
        }

        tracing::debug!(
            "loaded native module {} (main: {}, start: {}, tick: {})",
            path.display(),
            main.is_some(),
            start.is_some(),
            tick.is_some()
        );

        Ok(Self {
            library: Arc::new(library),
            path: path.to_path_buf(),
            main,
            start,
            tick,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_tick(&self) -> bool {
        self.tick.is_some()
    }
}

impl Module for DylibModule {
    fn accepts_parameters(&self) -> bool {
        self.main.is_some()
    }

    fn run(&self, context: &ContextHandle, parameters: &[String]) -> std::result::Result<i32, BoxError> {
        if let Some(tick) = self.tick {
            let library = self.library.clone();
            context.add_tick_handler(tick_handler(move || {
                let _mapped = &library;
                // Safety: `library` keeps the symbol mapped.
                unsafe { tick() };
                Ok(())
            }));
        }

        if let Some(main) = self.main {
            let args = parameters
                .iter()
                .map(|p| CString::new(p.as_str()))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| {
                    Error::InvalidParameters(format!("parameter contains a NUL byte: {}", e))
                })?;
            let mut argv: Vec<*const c_char> = args.iter().map(|a| a.as_ptr()).collect();
            argv.push(std::ptr::null());
            let argc = c_int::try_from(args.len())
                .map_err(|_| Error::InvalidParameters("too many parameters".to_string()))?;

            // Safety: `argv` holds `argc` valid NUL-terminated strings followed
            // by a null pointer, all alive for the duration of the call.
            return Ok(unsafe { main(argc, argv.as_ptr()) });
        }

        match self.start {
            // Safety: parameterless entry point per the module ABI.
            Some(start) => Ok(unsafe { start() }),
            None => Err(format!("{} has no entry point", self.path.display()).into()),
        }
    }
}
