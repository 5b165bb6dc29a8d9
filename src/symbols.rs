//! Function address to name resolution
//!
//! The engine asks a [`SymbolResolver`] for the name behind every function
//! address it sees on enter/exit. Resolution is best effort: an address with
//! no symbol still produces a frame, and library code is renamed to a
//! placeholder instead of being dropped so depth bookkeeping stays balanced.

use crate::address::Address;
use crate::event::normalize_function_name;
use std::borrow::Cow;
use std::collections::HashMap;

/// Frame name used for functions living in system libraries
pub const LIBRARY_PLACEHOLDER: &str = "user_function";

/// Frame name used when no symbol covers the address
pub const UNRESOLVED_FUNCTION: &str = "main";

/// Markers of compiler-generated static initialisation thunks
const STATIC_INIT_MARKERS: &[&str] = &["GLOBAL__sub", "_static_initialization_and_destruction"];

/// Object paths treated as system/runtime libraries
const SYSTEM_OBJECT_MARKERS: &[&str] = &["/usr/", "/lib/", "libc", "libstdc++"];

/// Where a resolved symbol comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolOrigin {
    /// Code of the instrumented program
    User,
    /// System or runtime library code
    Library,
    /// Static initialisation thunk; not tracked at all
    StaticInit,
    /// No symbol found
    Unresolved,
}

/// Outcome of a lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSymbol {
    pub name: String,
    pub origin: SymbolOrigin,
}

impl ResolvedSymbol {
    pub fn user(name: &str) -> Self {
        Self {
            name: normalize_function_name(name),
            origin: SymbolOrigin::User,
        }
    }

    pub fn unresolved() -> Self {
        Self {
            name: UNRESOLVED_FUNCTION.to_string(),
            origin: SymbolOrigin::Unresolved,
        }
    }

    /// Classify a demangled name by its name and the object that defines it
    pub fn classify(name: &str, object_path: Option<&str>) -> Self {
        let origin = if STATIC_INIT_MARKERS.iter().any(|m| name.contains(m)) {
            SymbolOrigin::StaticInit
        } else if object_path
            .is_some_and(|path| SYSTEM_OBJECT_MARKERS.iter().any(|m| path.contains(m)))
        {
            SymbolOrigin::Library
        } else {
            SymbolOrigin::User
        };
        Self {
            name: normalize_function_name(name),
            origin,
        }
    }

    /// Name to give the call frame, or `None` when the call is not tracked
    pub fn frame_name(&self) -> Option<Cow<'_, str>> {
        match self.origin {
            SymbolOrigin::StaticInit => None,
            SymbolOrigin::Library => Some(Cow::Borrowed(LIBRARY_PLACEHOLDER)),
            SymbolOrigin::Unresolved => Some(Cow::Borrowed(UNRESOLVED_FUNCTION)),
            SymbolOrigin::User => Some(Cow::Borrowed(self.name.as_str())),
        }
    }
}

/// Resolves function addresses to names
pub trait SymbolResolver: Send + Sync {
    fn resolve(&self, address: Address) -> ResolvedSymbol;
}

/// Demangle a raw symbol (Rust or C++ manglings), falling back to the bytes
pub fn demangle(raw: &[u8]) -> String {
    backtrace::SymbolName::new(raw).to_string()
}

/// Resolver backed by the dynamic linker's symbol tables (`dladdr`)
///
/// Only exported symbols are visible; link instrumented programs with
/// `-rdynamic` for useful names.
#[derive(Debug, Default, Clone, Copy)]
pub struct DlSymbolResolver;

#[cfg(unix)]
impl SymbolResolver for DlSymbolResolver {
    fn resolve(&self, address: Address) -> ResolvedSymbol {
        use std::ffi::CStr;

        // SAFETY: Dl_info is plain data; all-zero is a valid "nothing found" value
        let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
        // SAFETY: dladdr only inspects the address value and fills `info`
        let found = unsafe { libc::dladdr(address.0 as *const libc::c_void, &mut info) } != 0;
        if !found || info.dli_sname.is_null() {
            return ResolvedSymbol::unresolved();
        }

        // SAFETY: dladdr returned non-null NUL-terminated strings owned by the loader
        let raw_name = unsafe { CStr::from_ptr(info.dli_sname) };
        let object = if info.dli_fname.is_null() {
            None
        } else {
            // SAFETY: as above
            Some(unsafe { CStr::from_ptr(info.dli_fname) }.to_string_lossy())
        };

        ResolvedSymbol::classify(&demangle(raw_name.to_bytes()), object.as_deref())
    }
}

#[cfg(not(unix))]
impl SymbolResolver for DlSymbolResolver {
    fn resolve(&self, _address: Address) -> ResolvedSymbol {
        ResolvedSymbol::unresolved()
    }
}

/// Fixed address-to-symbol table
///
/// Useful for embedders that register their own functions and for tests.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    symbols: HashMap<Address, ResolvedSymbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user function
    pub fn with_function(mut self, address: Address, name: &str) -> Self {
        self.symbols.insert(address, ResolvedSymbol::user(name));
        self
    }

    /// Register a symbol defined in `object_path`, classified like `dladdr` results
    pub fn with_symbol(mut self, address: Address, name: &str, object_path: &str) -> Self {
        self.symbols
            .insert(address, ResolvedSymbol::classify(name, Some(object_path)));
        self
    }
}

impl SymbolResolver for SymbolTable {
    fn resolve(&self, address: Address) -> ResolvedSymbol {
        self.symbols
            .get(&address)
            .cloned()
            .unwrap_or_else(ResolvedSymbol::unresolved)
    }
}
