//! Sample native module.
//!
//! Prints its parameters, then counts ticks until it has seen `--ticks N`
//! of them (default 3) or `--timeout-ms` elapses (default 5000).
//!
//! ```text
//! domus run target/debug/libdomus_sample.so -- --ticks 10
//! ```

use std::ffi::CStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use libc::{c_char, c_int};

static TICKS: AtomicU64 = AtomicU64::new(0);

struct Options {
    ticks: u64,
    timeout: Duration,
}

fn parse_options(args: &[String]) -> Result<Options, String> {
    let mut options = Options {
        ticks: 3,
        timeout: Duration::from_millis(5000),
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let value = |flag: &str, v: Option<&String>| -> Result<u64, String> {
            v.ok_or_else(|| format!("{} needs a value", flag))?
                .parse()
                .map_err(|e| format!("{}: {}", flag, e))
        };
        match arg.as_str() {
            "--ticks" => options.ticks = value("--ticks", iter.next())?,
            "--timeout-ms" => {
                options.timeout = Duration::from_millis(value("--timeout-ms", iter.next())?)
            }
            _ => {}
        }
    }
    Ok(options)
}

/// # Safety
///
/// `argv` must hold `argc` NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn domus_module_main(argc: c_int, argv: *const *const c_char) -> c_int {
    let args: Vec<String> = (0..argc.max(0) as usize)
        .map(|i| {
            // Safety: `argv` holds `argc` valid strings per the module ABI.
            unsafe { CStr::from_ptr(*argv.add(i)) }
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    println!("domus-sample started with {:?}", args);

    let options = match parse_options(&args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("domus-sample: {}", e);
            return 2;
        }
    };

    let start_ticks = TICKS.load(Ordering::Relaxed);
    let deadline = Instant::now() + options.timeout;
    while TICKS.load(Ordering::Relaxed) - start_ticks < options.ticks {
        if Instant::now() >= deadline {
            eprintln!("domus-sample: timed out waiting for ticks");
            return 1;
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    println!("domus-sample saw {} ticks", options.ticks);
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn domus_module_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}
