// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Symbol lookup requests and their result slots.
//!
//! Requests accumulate results incrementally: resolution fills in whatever
//! result fields it can and never overwrites a field that is already set,
//! making repeated resolution idempotent.

use crate::pattern::SymbolPattern;
use crate::VirtAddr;
use std::fmt;
use std::path::PathBuf;
use std::slice;

/// What a lookup request asks for.
#[derive(Debug, Clone)]
pub enum RequestKind {
    /// Find the address of a symbol matching a name pattern.
    Name(SymbolPattern),
    /// Find the function containing a runtime address.
    Address(VirtAddr),
}

/// Source location attached to a resolved request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Source file path.
    pub file: String,
    /// Line number, starting at `1`.
    pub line: Option<u32>,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}", self.file, line),
            None => f.write_str(&self.file),
        }
    }
}

/// A single symbol lookup request together with its accumulated results.
#[derive(Debug, Clone)]
pub struct SymbolRequest {
    pub(crate) kind: RequestKind,

    /// Caller-chosen value carried through resolution, e.g. for correlating
    /// resolved symbols back to the probes that asked for them.
    pub(crate) cookie: u64,

    pub(crate) resolved_name: Option<String>,
    pub(crate) resolved_file: Option<PathBuf>,
    pub(crate) resolved_addr: Option<VirtAddr>,
    pub(crate) resolved_file_offset: Option<u64>,
    pub(crate) resolved_source: Option<SourceLocation>,
}

impl SymbolRequest {
    /// Creates an unresolved name lookup request.
    pub(crate) fn name(pattern: &str, cookie: u64) -> Self {
        Self {
            kind: RequestKind::Name(SymbolPattern::new(pattern)),
            cookie,
            resolved_name: None,
            resolved_file: None,
            resolved_addr: None,
            resolved_file_offset: None,
            resolved_source: None,
        }
    }

    /// Creates an unresolved address lookup request.
    pub(crate) fn address(addr: VirtAddr, cookie: u64) -> Self {
        Self {
            kind: RequestKind::Address(addr),
            cookie,
            resolved_name: None,
            resolved_file: None,
            resolved_addr: None,
            resolved_file_offset: None,
            resolved_source: None,
        }
    }

    /// Runtime address that a probe for this request would target.
    ///
    /// For address requests this is the requested address itself, for name
    /// requests the address that resolution found (if any).
    pub(crate) fn probe_addr(&self) -> Option<VirtAddr> {
        match self.kind {
            RequestKind::Address(addr) => Some(addr),
            RequestKind::Name(_) => self.resolved_addr,
        }
    }

    /// Best available name: the resolved symbol name, else the pattern text.
    pub(crate) fn display_name(&self) -> Option<&str> {
        if let Some(name) = self.resolved_name.as_deref() {
            return Some(name);
        }

        match &self.kind {
            RequestKind::Name(pattern) => Some(pattern.text()),
            RequestKind::Address(_) => None,
        }
    }
}

/// Ordered list of requests, in insertion order.
#[derive(Debug, Default)]
pub(crate) struct RequestSet(Vec<SymbolRequest>);

impl IntoIterator for RequestSet {
    type Item = SymbolRequest;
    type IntoIter = std::vec::IntoIter<SymbolRequest>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl RequestSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, request: SymbolRequest) {
        self.0.push(request);
    }

    pub(crate) fn extend(&mut self, requests: impl IntoIterator<Item = SymbolRequest>) {
        self.0.extend(requests);
    }

    pub(crate) fn iter(&self) -> slice::Iter<'_, SymbolRequest> {
        self.0.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> slice::IterMut<'_, SymbolRequest> {
        self.0.iter_mut()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether a name request with exactly this pattern text exists.
    pub(crate) fn contains_name(&self, text: &str) -> bool {
        self.iter().any(|r| match &r.kind {
            RequestKind::Name(pattern) => pattern.text() == text,
            RequestKind::Address(_) => false,
        })
    }

    /// Whether an address request for this address exists.
    pub(crate) fn contains_address(&self, addr: VirtAddr) -> bool {
        self.iter()
            .any(|r| matches!(r.kind, RequestKind::Address(a) if a == addr))
    }

    /// Whether an already-resolved entry with this exact result exists.
    ///
    /// Used to keep wildcard expansion idempotent across repeated
    /// resolution runs.
    pub(crate) fn contains_resolved(&self, name: &str, addr: VirtAddr, cookie: u64) -> bool {
        self.iter().any(|r| {
            r.cookie == cookie
                && r.resolved_addr == Some(addr)
                && r.resolved_name.as_deref() == Some(name)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_addr_by_kind() {
        let addr_req = SymbolRequest::address(0x1000, 7);
        assert_eq!(addr_req.probe_addr(), Some(0x1000));

        let mut name_req = SymbolRequest::name("malloc", 7);
        assert_eq!(name_req.probe_addr(), None);
        name_req.resolved_addr = Some(0x2000);
        assert_eq!(name_req.probe_addr(), Some(0x2000));
    }

    #[test]
    fn display_name_fallback() {
        let mut req = SymbolRequest::name("mall?c", 0);
        assert_eq!(req.display_name(), Some("mall?c"));
        req.resolved_name = Some("malloc".into());
        assert_eq!(req.display_name(), Some("malloc"));

        assert_eq!(SymbolRequest::address(0x1000, 0).display_name(), None);
    }

    #[test]
    fn dedup_lookups() {
        let mut set = RequestSet::new();
        set.push(SymbolRequest::name("free", 1));
        set.push(SymbolRequest::address(0x4000, 2));

        assert!(set.contains_name("free"));
        assert!(!set.contains_name("malloc"));
        assert!(set.contains_address(0x4000));
        assert!(!set.contains_address(0x4001));

        assert!(!set.contains_resolved("free", 0x1234, 1));
        let mut child = SymbolRequest::name("free", 1);
        child.resolved_name = Some("free".into());
        child.resolved_addr = Some(0x1234);
        set.push(child);
        assert!(set.contains_resolved("free", 0x1234, 1));
        assert!(!set.contains_resolved("free", 0x1234, 99));
    }
}
