// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Command line front-end for the `probesym` library.

use argh::FromArgs;
use probesym::context::DebugContext;
use probesym::procmaps::FileMaps;
use probesym::{dbglog, ldtrace, AnyError, VirtAddr};
use std::path::PathBuf;
use std::sync::atomic::Ordering;

/// Resolve probe symbols in executables and live processes.
#[derive(FromArgs)]
struct Args {
    /// print debug diagnostics to stderr
    #[argh(switch, short = 'v')]
    verbose: bool,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Resolve(Resolve),
    Deps(Deps),
    Maps(Maps),
}

/// Resolve symbol names and addresses.
///
/// Requests are either name patterns (`malloc`, `pthread_*`) or hex
/// addresses (`0x7f1234..`), each optionally suffixed with `:<cookie>`.
/// Requests without a cookie use their argument position.
#[derive(FromArgs)]
#[argh(subcommand, name = "resolve")]
struct Resolve {
    /// pid of a live process to inspect
    #[argh(option, short = 'p')]
    pid: Option<u32>,

    /// path of an executable to inspect instead of a live process
    #[argh(option, short = 'f')]
    file: Option<PathBuf>,

    /// also search shared library dependencies
    #[argh(switch, short = 'l')]
    libs: bool,

    /// name patterns or hex addresses to resolve
    #[argh(positional)]
    requests: Vec<String>,
}

/// List the shared library dependencies of an executable.
#[derive(FromArgs)]
#[argh(subcommand, name = "deps")]
struct Deps {
    /// path of the executable
    #[argh(positional)]
    executable: PathBuf,
}

/// Show the file-backed memory mappings of a process.
#[derive(FromArgs)]
#[argh(subcommand, name = "maps")]
struct Maps {
    /// pid of the process (0 for the current one)
    #[argh(positional)]
    pid: u32,
}

/// One parsed lookup request.
enum Request {
    Name(String, u64),
    Address(VirtAddr, u64),
}

/// Parses `TARGET[:COOKIE]` request arguments.
///
/// Name patterns containing `:` (e.g. C++ symbols) still work because only
/// a numeric suffix counts as a cookie.
fn parse_request(arg: &str, position: u64) -> Request {
    let (target, cookie) = match arg.rsplit_once(':') {
        Some((target, suffix)) => match suffix.parse::<u64>() {
            Ok(cookie) => (target, cookie),
            Err(_) => (arg, position),
        },
        None => (arg, position),
    };

    if let Some(hex) = target.strip_prefix("0x") {
        if let Ok(addr) = u64::from_str_radix(hex, 16) {
            return Request::Address(addr, cookie);
        }
    }

    Request::Name(target.to_owned(), cookie)
}

fn cmd_resolve(args: Resolve) -> Result<(), AnyError> {
    let mut ctx = match (args.pid, &args.file) {
        (Some(pid), None) => DebugContext::for_pid(pid, args.libs)?,
        (None, Some(file)) => DebugContext::for_file(file, args.libs),
        _ => return Err("exactly one of --pid and --file must be given".into()),
    };

    for (i, arg) in args.requests.iter().enumerate() {
        match parse_request(arg, i as u64) {
            Request::Name(pattern, cookie) => ctx.add_name_request(&pattern, cookie),
            Request::Address(addr, cookie) => ctx.add_address_request(addr, cookie)?,
        }
    }

    ctx.resolve();

    for symbol in ctx.resolved() {
        println!("{symbol}");
    }

    Ok(())
}

fn cmd_deps(args: Deps) -> Result<(), AnyError> {
    for dep in ldtrace::list_dependencies(&args.executable)? {
        println!("{}", dep.display());
    }

    Ok(())
}

fn cmd_maps(args: Maps) -> Result<(), AnyError> {
    let maps = FileMaps::load(args.pid)?;

    println!("{} ({})", maps.exe.display(), maps.pid);
    for region in &maps.regions {
        println!(
            "{:#014x}-{:#014x} {} {:#010x} {}",
            region.range.start,
            region.range.end,
            region.perms,
            region.file_offset,
            region.path.display(),
        );
    }

    Ok(())
}

fn main() -> Result<(), AnyError> {
    let args: Args = argh::from_env();

    if args.verbose {
        dbglog::ENABLED.store(true, Ordering::Relaxed);
    }

    match args.command {
        Command::Resolve(resolve) => cmd_resolve(resolve),
        Command::Deps(deps) => cmd_deps(deps),
        Command::Maps(maps) => cmd_maps(maps),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parsing() {
        assert!(matches!(
            parse_request("malloc", 0),
            Request::Name(name, 0) if name == "malloc"
        ));
        assert!(matches!(
            parse_request("pthread_*:7", 0),
            Request::Name(name, 7) if name == "pthread_*"
        ));
        assert!(matches!(
            parse_request("0x7f1234:9", 0),
            Request::Address(0x7f1234, 9)
        ));
        assert!(matches!(
            parse_request("0x10", 3),
            Request::Address(0x10, 3)
        ));
        // C++ names keep their colons when the suffix is not numeric.
        assert!(matches!(
            parse_request("std::vector*", 2),
            Request::Name(name, 2) if name == "std::vector*"
        ));
    }
}
