//! Type catalog used to size identifiers, casts and dereferences.
//!
//! The decompiler names types by their C signature (`int`, `unsigned char`,
//! `char*`). The emulator only needs byte sizes, so the catalog maps a
//! signature to a size and strips one level of indirection from pointer
//! signatures.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A C type signature as printed by the decompiler.
pub type TypeSig = String;

/// Size lookups over type signatures.
pub trait TypeCatalog: fmt::Debug + Send + Sync {
    /// Size in bytes of the named type, `None` if unknown.
    fn size_of(&self, signature: &str) -> Option<usize>;

    /// Signature of the type pointed to by a pointer signature.
    ///
    /// Returns `None` if `signature` is not a pointer.
    fn base_type_signature(&self, signature: &str) -> Option<String> {
        strip_pointer(signature).map(str::to_string)
    }
}

/// Strips one trailing `*` (and surrounding whitespace) from a signature.
pub fn strip_pointer(signature: &str) -> Option<&str> {
    signature.trim_end().strip_suffix('*').map(str::trim_end)
}

/// A database of type sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDatabase {
    /// Pointer size in bytes.
    #[serde(default = "default_pointer_size")]
    pointer_size: usize,

    /// Named types and their sizes.
    #[serde(default)]
    types: HashMap<String, usize>,
}

fn default_pointer_size() -> usize {
    8
}

/// Builtin C types, decompiler aliases and their LP64 sizes.
const BUILTINS: &[(&str, usize)] = &[
    ("char", 1),
    ("signed char", 1),
    ("unsigned char", 1),
    ("bool", 1),
    ("_BOOL1", 1),
    ("_BYTE", 1),
    ("int8_t", 1),
    ("uint8_t", 1),
    ("short", 2),
    ("unsigned short", 2),
    ("_WORD", 2),
    ("int16_t", 2),
    ("uint16_t", 2),
    ("int", 4),
    ("unsigned int", 4),
    ("_DWORD", 4),
    ("int32_t", 4),
    ("uint32_t", 4),
    ("float", 4),
    ("long", 8),
    ("unsigned long", 8),
    ("long long", 8),
    ("unsigned long long", 8),
    ("_QWORD", 8),
    ("int64_t", 8),
    ("uint64_t", 8),
    ("size_t", 8),
    ("double", 8),
];

impl Default for TypeDatabase {
    fn default() -> Self {
        Self::with_pointer_size(8)
    }
}

impl TypeDatabase {
    /// Create a database with builtins and 8-byte pointers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a database with builtins and the given pointer size.
    pub fn with_pointer_size(pointer_size: usize) -> Self {
        let mut db = Self {
            pointer_size,
            types: HashMap::new(),
        };
        for (name, size) in BUILTINS {
            db.types.insert((*name).to_string(), *size);
        }
        if pointer_size == 4 {
            db.types.insert("long".into(), 4);
            db.types.insert("unsigned long".into(), 4);
            db.types.insert("size_t".into(), 4);
        }
        db
    }

    /// Create a database without builtins.
    pub fn empty(pointer_size: usize) -> Self {
        Self {
            pointer_size,
            types: HashMap::new(),
        }
    }

    pub fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    /// Add or replace a named type.
    pub fn add_type(&mut self, name: impl Into<String>, size: usize) {
        self.types.insert(name.into(), size);
    }

    /// Merge named types from another map, overriding existing entries.
    pub fn extend<I, S>(&mut self, types: I)
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        for (name, size) in types {
            self.types.insert(name.into(), size);
        }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl TypeCatalog for TypeDatabase {
    fn size_of(&self, signature: &str) -> Option<usize> {
        let signature = signature.trim();
        if strip_pointer(signature).is_some() {
            return Some(self.pointer_size);
        }
        if let Some(size) = self.types.get(signature) {
            return Some(*size);
        }
        // `const int`, `volatile char` and friends.
        let unqualified = signature
            .strip_prefix("const ")
            .or_else(|| signature.strip_prefix("volatile "))?;
        self.size_of(unqualified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_sizes() {
        let db = TypeDatabase::new();
        assert_eq!(db.size_of("unsigned char"), Some(1));
        assert_eq!(db.size_of("short"), Some(2));
        assert_eq!(db.size_of("_DWORD"), Some(4));
        assert_eq!(db.size_of("long long"), Some(8));
        assert_eq!(db.size_of("const int"), Some(4));
        assert_eq!(db.size_of("struct foo"), None);
    }

    #[test]
    fn test_pointer_signatures() {
        let db = TypeDatabase::with_pointer_size(4);
        assert_eq!(db.size_of("char*"), Some(4));
        assert_eq!(db.size_of("int **"), Some(4));
        assert_eq!(db.base_type_signature("short*").as_deref(), Some("short"));
        assert_eq!(db.base_type_signature("char **").as_deref(), Some("char *"));
        assert_eq!(db.base_type_signature("int"), None);
        assert_eq!(db.size_of("long"), Some(4));
    }

    #[test]
    fn test_deserialize_with_custom_types() {
        let db: TypeDatabase =
            serde_json::from_str(r#"{"pointer_size": 8, "types": {"struct node": 16}}"#).unwrap();
        assert_eq!(db.size_of("struct node"), Some(16));
        // Deserialized databases carry only the listed types.
        assert_eq!(db.size_of("int"), None);
    }
}
