// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Cross-language symbol demangling.
//!
//! Used when reporting function names for address lookups. Name patterns
//! given in requests are always matched against the raw symbol names, so
//! resolution itself never depends on this module.

use std::borrow::Cow;

/// Strips disambiguation suffixes commonly appended to function clones.
///
/// Optimization passes create specialized copies of functions (e.g. with
/// constant-propagated arguments) and disambiguate them with dot-prefixed
/// suffixes like `.isra.0`. binutils' demangler treats everything after a `.`
/// as a clone suffix, which works for Rust and C++ because neither allows
/// single dots in a name. Symbols from Go objects DO contain regular dots
/// (`runtime.saveg`) without any prefix that would let us tell them apart
/// from a C symbol with a clone suffix, so we keep a white-list of known
/// suffixes instead.
fn strip_clone_suffixes(mut name: &str) -> &str {
    // Strip suffixes like ".llvm.9420829416740162726", ".constprop.0", etc.
    for suffix in &[".clone.", ".constprop.", ".llvm.", ".isra.", ".part."] {
        if let Some(pos) = name.rfind(suffix) {
            if name[pos + suffix.len()..]
                .chars()
                .take_while(|&x| x != '.')
                .all(|x| x.is_ascii_digit())
            {
                name = &name[..pos];
            }
        }
    }

    // Strip ".cold" suffix.
    if let Some(stripped) = name.strip_suffix(".cold") {
        name = stripped;
    }

    name
}

fn could_be_rust_symbol(name: &str) -> bool {
    // V0 mangling.
    if name.starts_with("_R") {
        return true;
    }

    // Legacy mangling: _ZN.*17h[a-zA-Z0-9]{16}E
    if name.starts_with("_ZN")
        && name.ends_with('E')
        && name.len() > 3 + 3 + 16 + 1
        && &name[name.len() - 3 - 16 - 1..][..3] == "17h"
        && name[name.len() - 16 - 1..][..16]
            .chars()
            .all(|x| x.is_ascii_hexdigit())
    {
        return true;
    }

    false
}

fn could_be_itanium_abi_cxx_symbol(name: &str) -> bool {
    // With the exception of MSVC, this is the C++ mangling format emitted
    // by essentially all modern C++ compilers.
    //
    // https://itanium-cxx-abi.github.io/cxx-abi/abi.html#mangling
    name.starts_with("_Z") || name.starts_with("___Z")
}

/// Demangles the given symbol name.
///
/// Names that aren't mangled (or use a scheme we don't understand) are
/// passed through untouched, save for clone suffix stripping.
pub fn demangle(mut name: &str) -> Cow<'_, str> {
    name = strip_clone_suffixes(name);

    if could_be_rust_symbol(name) {
        if let Ok(demangler) = rustc_demangle::try_demangle(name) {
            // The alternate formatting using `#` suppresses the hash suffix.
            return Cow::Owned(format!("{:#}", demangler));
        };
    }

    if could_be_itanium_abi_cxx_symbol(name) {
        if let Ok(sym) = cpp_demangle::BorrowedSymbol::new(name.as_bytes()) {
            let options = cpp_demangle::DemangleOptions::default();
            if let Ok(demangled) = sym.demangle(&options) {
                return Cow::Owned(demangled);
            }
        }
    }

    Cow::Borrowed(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c() {
        assert_eq!(demangle("blah.cold"), "blah");
        assert_eq!(demangle("blah.constprop.0.cold"), "blah");
        assert_eq!(demangle("blah"), "blah");
        assert_eq!(demangle("malloc_usable_size"), "malloc_usable_size");
        assert_eq!(
            demangle("_RustIsNotTheOnlyLangWhoseSymbolsCanStartWith_R"),
            "_RustIsNotTheOnlyLangWhoseSymbolsCanStartWith_R",
        );
    }

    #[test]
    fn cxx() {
        assert_eq!(demangle("_ZN4base6Killer3runEv"), "base::Killer::run()");

        let mangled = concat!(
            "_ZN2js8HeapSlot4postEPNS_12NativeObjectENS0_",
            "4KindEjRKN2JS5ValueE",
        );
        let demangled = concat!(
            "js::HeapSlot::post(js::NativeObject*, js::HeapSlot::Kind, ",
            "unsigned int, JS::Value const&)"
        );
        assert_eq!(demangle(mangled), demangled);

        // Clone suffixes are stripped before demangling.
        let mangled = concat!(
            "_ZN2js8HeapSlot4postEPNS_12NativeObjectENS0_",
            "4KindEjRKN2JS5ValueE.isra.0.cold",
        );
        assert_eq!(demangle(mangled), demangled);
    }

    #[test]
    fn rust() {
        let mangled = concat!(
            "_ZN50_$LT$$RF$mut$u20$W$u20$as$u20$core..fmt..Write",
            "$GT$10write_char17h40d2a72f9527ade5E.llvm.5999636307758439825",
        );
        assert_eq!(
            demangle(mangled),
            "<&mut W as core::fmt::Write>::write_char",
        );

        let mangled = concat!(
            "_ZN71_$LT$rustc_demangle..legacy..Demangle$u20",
            "$as$u20$core..fmt..Display$GT$3fmt17h48ee277748f854a8E",
        );
        assert_eq!(
            demangle(mangled),
            "<rustc_demangle::legacy::Demangle as core::fmt::Display>::fmt",
        );
    }

    #[test]
    fn go_passthrough() {
        // Go symbols contain real dots that must survive suffix stripping.
        let names = &[
            "runtime.(*mheap).grow",
            "runtime.cmpstring",
            "type..eq.k8s.io/api/core/v1.NodeSystemInfo",
        ];

        for &name in names {
            assert_eq!(demangle(name), name);
        }
    }
}
