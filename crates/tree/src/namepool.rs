//! Interning of qualified names into small integer codes.
//!
//! A [`NamePool`] maps `(prefix, uri, local-name)` triples to a packed
//! [`NameCode`]. The low 20 bits of a name code are the [`Fingerprint`], which
//! identifies the expanded name (URI plus local name) independently of the
//! prefix, so every name comparison on the matching path is an integer compare.
//!
//! Layout of a name code:
//!
//! ```text
//!  31      28 27        20 19          10 9           0
//! +----------+------------+--------------+-------------+
//! |  unused  |prefix index| chain depth  |  hash slot  |
//! +----------+------------+--------------+-------------+
//! ```
//!
//! The prefix index selects among the prefixes that have been used with the
//! name's URI; index 0 means "no prefix".
//!
//! The pool is shared as `Arc<NamePool>` between a compiled stylesheet and the
//! documents it runs against. Allocation is only legal until the pool is
//! sealed; afterwards it is read-only and lookups never allocate.

use crate::error::TreeError;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub const NULL_URI: &str = "";
pub const XML_URI: &str = "http://www.w3.org/XML/1998/namespace";
pub const XSLT_URI: &str = "http://www.w3.org/1999/XSL/Transform";
pub const SAXON_URI: &str = "http://icl.com/saxon";
pub const FUNCTIONS_URI: &str = "http://exslt.org/functions";

/// URI code of the null namespace.
pub const NULL_CODE: u16 = 0;
/// URI (and prefix) code of the `xml` namespace.
pub const XML_CODE: u16 = 1;
pub const XSLT_CODE: u16 = 2;
pub const SAXON_CODE: u16 = 3;
pub const FUNCTIONS_CODE: u16 = 4;

const HASH_SLOTS: u32 = 1023;
const MAX_CHAIN_DEPTH: u32 = 1024;
const MAX_PREFIXES_PER_URI: usize = 255;
const MAX_CODES: usize = 32000;

/// Identifies an expanded name (namespace URI + local name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u32);

impl Fingerprint {
    pub const fn raw(self) -> u32 {
        self.0
    }

    pub(crate) const fn from_raw(raw: u32) -> Self {
        Fingerprint(raw & 0xfffff)
    }

    /// The name code with prefix index 0 (no prefix).
    pub const fn to_name_code(self) -> NameCode {
        NameCode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0 >> 10, self.0 & 0x3ff)
    }
}

/// A fingerprint plus the prefix used to write the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameCode(u32);

impl NameCode {
    pub const fn fingerprint(self) -> Fingerprint {
        Fingerprint(self.0 & 0xfffff)
    }

    pub const fn prefix_index(self) -> u8 {
        ((self.0 >> 20) & 0xff) as u8
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub(crate) const fn from_raw(raw: u32) -> Self {
        NameCode(raw)
    }

    const fn hash_slot(self) -> usize {
        (self.0 & 0x3ff) as usize
    }

    const fn depth(self) -> usize {
        ((self.0 >> 10) & 0x3ff) as usize
    }
}

/// A (prefix, URI) binding: prefix code in the top 16 bits, URI code below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamespaceCode(u32);

impl NamespaceCode {
    pub const fn new(prefix_code: u16, uri_code: u16) -> Self {
        NamespaceCode(((prefix_code as u32) << 16) | uri_code as u32)
    }

    pub const fn prefix_code(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn uri_code(self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The binding of the `xml` prefix, implicitly in scope everywhere.
    pub const XML: NamespaceCode = NamespaceCode::new(XML_CODE, XML_CODE);

    /// `xmlns=""`: undeclares the default namespace.
    pub const NULL: NamespaceCode = NamespaceCode::new(NULL_CODE, NULL_CODE);
}

#[derive(Debug, Clone)]
struct NameEntry {
    local_name: Arc<str>,
    uri_code: u16,
}

#[derive(Debug, Clone)]
struct PoolData {
    slots: Vec<Vec<NameEntry>>,
    prefixes: Vec<Arc<str>>,
    uris: Vec<Arc<str>>,
    /// Prefix codes used with each URI; position + 1 is the prefix index.
    prefixes_for_uri: Vec<Vec<u16>>,
}

impl PoolData {
    fn seeded() -> Self {
        let pairs = [
            ("", NULL_URI),
            ("xml", XML_URI),
            ("xsl", XSLT_URI),
            ("saxon", SAXON_URI),
            ("func", FUNCTIONS_URI),
        ];
        let mut data = PoolData {
            slots: vec![Vec::new(); HASH_SLOTS as usize],
            prefixes: Vec::with_capacity(16),
            uris: Vec::with_capacity(16),
            prefixes_for_uri: Vec::with_capacity(16),
        };
        for (code, (prefix, uri)) in pairs.iter().enumerate() {
            data.prefixes.push(Arc::from(*prefix));
            data.uris.push(Arc::from(*uri));
            data.prefixes_for_uri
                .push(if code == 0 { Vec::new() } else { vec![code as u16] });
        }
        data
    }

    fn uri_code(&self, uri: &str) -> Option<u16> {
        self.uris.iter().position(|u| &**u == uri).map(|i| i as u16)
    }

    fn prefix_code(&self, prefix: &str) -> Option<u16> {
        self.prefixes
            .iter()
            .position(|p| &**p == prefix)
            .map(|i| i as u16)
    }

    fn entry(&self, code: NameCode) -> Option<&NameEntry> {
        self.slots.get(code.hash_slot())?.get(code.depth())
    }

    fn prefix_index(&self, uri_code: u16, prefix: &str) -> Option<u8> {
        if prefix.is_empty() {
            return Some(0);
        }
        let prefix_code = self.prefix_code(prefix)?;
        self.prefixes_for_uri[uri_code as usize]
            .iter()
            .position(|&p| p == prefix_code)
            .map(|i| (i + 1) as u8)
    }

    fn prefix_with_index(&self, uri_code: u16, index: u8) -> Option<Arc<str>> {
        if index == 0 {
            return Some(Arc::from(""));
        }
        let code = *self.prefixes_for_uri.get(uri_code as usize)?.get(index as usize - 1)?;
        self.prefixes.get(code as usize).cloned()
    }
}

/// Hash over the characters of a local name; stable across runs.
fn hash_local_name(local: &str) -> u32 {
    let h = local
        .chars()
        .fold(0u32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32));
    (h & 0x7fff_ffff) % HASH_SLOTS
}

/// Table of interned names and namespace bindings.
#[derive(Debug)]
pub struct NamePool {
    data: RwLock<PoolData>,
    sealed: AtomicBool,
    next_document: AtomicU32,
}

impl Default for NamePool {
    fn default() -> Self {
        Self::new()
    }
}

impl NamePool {
    pub fn new() -> Self {
        NamePool {
            data: RwLock::new(PoolData::seeded()),
            sealed: AtomicBool::new(false),
            next_document: AtomicU32::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, PoolData> {
        // Writers only ever append.
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, PoolData> {
        self.data.write().unwrap_or_else(|e| e.into_inner())
    }

    fn check_open(&self) -> Result<(), TreeError> {
        if self.is_sealed() {
            Err(TreeError::NamePoolSealed)
        } else {
            Ok(())
        }
    }

    /// Forbids any further allocation.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Copies every entry of `other` into this pool and seals `other`.
    ///
    /// Codes allocated in `other` keep their meaning in `self`.
    pub fn import_pool(&self, other: &NamePool) -> Result<(), TreeError> {
        self.check_open()?;
        let copied = other.read().clone();
        *self.write() = copied;
        other.seal();
        Ok(())
    }

    /// Hands out a number identifying a new document, for cross-document ordering.
    pub fn allocate_document_number(&self) -> u32 {
        self.next_document.fetch_add(1, Ordering::Relaxed)
    }

    pub fn allocate_code_for_uri(&self, uri: &str) -> Result<u16, TreeError> {
        if let Some(code) = self.read().uri_code(uri) {
            return Ok(code);
        }
        self.check_open()?;
        let mut data = self.write();
        if let Some(code) = data.uri_code(uri) {
            return Ok(code);
        }
        if data.uris.len() >= MAX_CODES {
            return Err(TreeError::TooManyCodes);
        }
        data.uris.push(Arc::from(uri));
        data.prefixes_for_uri.push(Vec::new());
        Ok((data.uris.len() - 1) as u16)
    }

    pub fn allocate_code_for_prefix(&self, prefix: &str) -> Result<u16, TreeError> {
        if let Some(code) = self.read().prefix_code(prefix) {
            return Ok(code);
        }
        self.check_open()?;
        let mut data = self.write();
        if let Some(code) = data.prefix_code(prefix) {
            return Ok(code);
        }
        if data.prefixes.len() >= MAX_CODES {
            return Err(TreeError::TooManyCodes);
        }
        data.prefixes.push(Arc::from(prefix));
        Ok((data.prefixes.len() - 1) as u16)
    }

    pub fn get_code_for_uri(&self, uri: &str) -> Option<u16> {
        self.read().uri_code(uri)
    }

    pub fn get_code_for_prefix(&self, prefix: &str) -> Option<u16> {
        self.read().prefix_code(prefix)
    }

    /// Interns a qualified name, returning its name code.
    ///
    /// Repeated calls with the same URI and local name always yield the same
    /// fingerprint, whatever the prefix.
    pub fn allocate(&self, prefix: &str, uri: &str, local_name: &str) -> Result<NameCode, TreeError> {
        let uri_code = self.allocate_code_for_uri(uri)?;
        self.allocate_with_uri_code(prefix, uri_code, local_name)
    }

    pub fn allocate_with_uri_code(
        &self,
        prefix: &str,
        uri_code: u16,
        local_name: &str,
    ) -> Result<NameCode, TreeError> {
        let hash = hash_local_name(local_name);

        // Fast path: everything already present.
        {
            let data = self.read();
            if let Some(prefix_index) = data.prefix_index(uri_code, prefix)
                && let Some(depth) = data.slots[hash as usize]
                    .iter()
                    .position(|e| e.uri_code == uri_code && &*e.local_name == local_name)
            {
                return Ok(NameCode(((prefix_index as u32) << 20) | ((depth as u32) << 10) | hash));
            }
        }

        let prefix_code = if prefix.is_empty() {
            0
        } else {
            self.allocate_code_for_prefix(prefix)?
        };

        let mut data = self.write();
        if (uri_code as usize) >= data.uris.len() {
            return Err(TreeError::Builder(format!("Unknown URI code {uri_code}")));
        }
        let prefix_index = match data.prefix_index(uri_code, prefix) {
            Some(index) => index,
            None => {
                self.check_open()?;
                let list = &mut data.prefixes_for_uri[uri_code as usize];
                if list.len() >= MAX_PREFIXES_PER_URI {
                    return Err(TreeError::TooManyPrefixes {
                        uri: data.uris[uri_code as usize].to_string(),
                    });
                }
                list.push(prefix_code);
                list.len() as u8
            }
        };

        let chain = &mut data.slots[hash as usize];
        let depth = match chain
            .iter()
            .position(|e| e.uri_code == uri_code && &*e.local_name == local_name)
        {
            Some(depth) => depth as u32,
            None => {
                if chain.len() as u32 >= MAX_CHAIN_DEPTH {
                    return Err(TreeError::NamePoolFull);
                }
                self.check_open()?;
                chain.push(NameEntry {
                    local_name: Arc::from(local_name),
                    uri_code,
                });
                (chain.len() - 1) as u32
            }
        };
        Ok(NameCode(((prefix_index as u32) << 20) | (depth << 10) | hash))
    }

    /// Read-only lookup of an expanded name; `None` when it was never allocated.
    pub fn get_fingerprint(&self, uri: &str, local_name: &str) -> Option<Fingerprint> {
        let data = self.read();
        let uri_code = data.uri_code(uri)?;
        let hash = hash_local_name(local_name);
        let depth = data.slots[hash as usize]
            .iter()
            .position(|e| e.uri_code == uri_code && &*e.local_name == local_name)?;
        Some(Fingerprint(((depth as u32) << 10) | hash))
    }

    pub fn get_local_name(&self, code: NameCode) -> Result<Arc<str>, TreeError> {
        self.read()
            .entry(code)
            .map(|e| e.local_name.clone())
            .ok_or(TreeError::UnknownNameCode(code.raw()))
    }

    pub fn get_uri_code(&self, code: NameCode) -> Result<u16, TreeError> {
        self.read()
            .entry(code)
            .map(|e| e.uri_code)
            .ok_or(TreeError::UnknownNameCode(code.raw()))
    }

    pub fn get_uri(&self, code: NameCode) -> Result<Arc<str>, TreeError> {
        let data = self.read();
        let entry = data.entry(code).ok_or(TreeError::UnknownNameCode(code.raw()))?;
        Ok(data.uris[entry.uri_code as usize].clone())
    }

    pub fn get_prefix(&self, code: NameCode) -> Result<Arc<str>, TreeError> {
        let data = self.read();
        let entry = data.entry(code).ok_or(TreeError::UnknownNameCode(code.raw()))?;
        data.prefix_with_index(entry.uri_code, code.prefix_index())
            .ok_or(TreeError::UnknownNameCode(code.raw()))
    }

    /// `prefix:local`, or just `local` when the name is unprefixed.
    pub fn get_display_name(&self, code: NameCode) -> Result<String, TreeError> {
        let data = self.read();
        let entry = data.entry(code).ok_or(TreeError::UnknownNameCode(code.raw()))?;
        if code.prefix_index() == 0 {
            return Ok(entry.local_name.to_string());
        }
        let prefix = data
            .prefix_with_index(entry.uri_code, code.prefix_index())
            .ok_or(TreeError::UnknownNameCode(code.raw()))?;
        Ok(format!("{}:{}", prefix, entry.local_name))
    }

    /// Allocates a namespace code, recording the prefix against the URI.
    pub fn allocate_namespace_code(&self, prefix: &str, uri: &str) -> Result<NamespaceCode, TreeError> {
        let prefix_code = self.allocate_code_for_prefix(prefix)?;
        let uri_code = self.allocate_code_for_uri(uri)?;
        if prefix_code != 0 {
            let known = self.read().prefixes_for_uri[uri_code as usize].contains(&prefix_code);
            if !known {
                self.check_open()?;
                let mut data = self.write();
                let list = &mut data.prefixes_for_uri[uri_code as usize];
                if !list.contains(&prefix_code) {
                    if list.len() >= MAX_PREFIXES_PER_URI {
                        return Err(TreeError::TooManyPrefixes { uri: uri.to_string() });
                    }
                    list.push(prefix_code);
                }
            }
        }
        Ok(NamespaceCode::new(prefix_code, uri_code))
    }

    /// Read-only variant of [`NamePool::allocate_namespace_code`].
    pub fn get_namespace_code(&self, prefix: &str, uri: &str) -> Option<NamespaceCode> {
        let data = self.read();
        let prefix_code = data.prefix_code(prefix)?;
        let uri_code = data.uri_code(uri)?;
        if prefix_code != 0 && !data.prefixes_for_uri[uri_code as usize].contains(&prefix_code) {
            return None;
        }
        Some(NamespaceCode::new(prefix_code, uri_code))
    }

    /// The namespace binding a name was written with.
    pub fn namespace_code_of(&self, code: NameCode) -> Result<NamespaceCode, TreeError> {
        let prefix = self.get_prefix(code)?;
        let uri_code = self.get_uri_code(code)?;
        let prefix_code = self.allocate_code_for_prefix(&prefix)?;
        Ok(NamespaceCode::new(prefix_code, uri_code))
    }

    pub fn get_prefix_from_namespace_code(&self, code: NamespaceCode) -> Option<Arc<str>> {
        self.read().prefixes.get(code.prefix_code() as usize).cloned()
    }

    pub fn get_uri_from_namespace_code(&self, code: NamespaceCode) -> Option<Arc<str>> {
        self.read().uris.get(code.uri_code() as usize).cloned()
    }

    pub fn get_uri_from_uri_code(&self, code: u16) -> Option<Arc<str>> {
        self.read().uris.get(code as usize).cloned()
    }
}
