//! # Type Library
//!
//! The registry of value types. Every type normalizes raw input, produces a
//! canonical sortable byte encoding and renders a display form.
//!
//! The registry is filled once, while the model is being built, from the
//! `ctors` and `types` sections of the schema plus the built-in base kinds.
//! Once forms resolve, the type of every property is recorded as well so
//! `nodeprop` values can be normalized. After that it is only ever read.
//!
//! ## Encodings
//!
//! - `int`, `time`, `bool`: 8 bytes, big-endian, sign bit flipped
//! - `str`, `hex`: UTF-8 bytes
//! - `guid`: the 16 decoded bytes
//! - `comp`: each field's index framed by a 4-byte big-endian length
//! - `ndef`: framed form name followed by the framed value index
//! - `nodeprop`: framed prop name followed by the framed value index
//! - `loc`: each lower case segment followed by `0x00`

mod kinds;
pub mod time;

pub use kinds::{BaseKind, CompField, TypeKind, int_indx};

use kinds::{loc_indx, loc_parts};

use crate::{StoreError, Valu};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Free-form type options as written in the schema.
pub type TypeOpts = serde_json::Map<String, serde_json::Value>;

/// A type reference with options: `["int", {"min": 20}]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSpec(pub String, pub TypeOpts);

impl TypeSpec {
    /// A reference to a named type without extra options.
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into(), TypeOpts::new())
    }
}

/// The result of normalizing a raw value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Norm {
    /// The canonical value.
    pub valu: Valu,
    /// Named sub-values (composite fields, ndef form, nodeprop prop).
    pub subs: BTreeMap<String, Valu>,
}

impl Norm {
    /// A normalized value without sub-values.
    #[must_use]
    pub fn new(valu: Valu) -> Self {
        Self {
            valu,
            subs: BTreeMap::new(),
        }
    }
}

// =============================================================================
// TYPE
// =============================================================================

/// A registered type: a base kind specialized by options.
#[derive(Debug)]
pub struct Type {
    name: String,
    base: BaseKind,
    opts: TypeOpts,
    kind: TypeKind,
    doc: Option<String>,
}

impl Type {
    fn builtin(base: BaseKind) -> Self {
        Self {
            name: base.name().to_string(),
            base,
            opts: TypeOpts::new(),
            kind: TypeKind::bare(base),
            doc: None,
        }
    }

    /// Derive a new type from this one, merging `extra` over its options.
    fn derive(
        &self,
        name: &str,
        extra: &TypeOpts,
        doc: Option<String>,
        lib: &TypeLib,
    ) -> Result<Self, StoreError> {
        let mut opts = self.opts.clone();
        for (key, valu) in extra {
            opts.insert(key.clone(), valu.clone());
        }
        let kind = TypeKind::from_opts(self.base, &opts, lib)?;
        Ok(Self {
            name: name.to_string(),
            base: self.base,
            opts,
            kind,
            doc,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn base(&self) -> BaseKind {
        self.base
    }

    #[must_use]
    pub fn opts(&self) -> &TypeOpts {
        &self.opts
    }

    #[must_use]
    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    #[must_use]
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// Normalize a raw value. Fails with `BadTypeValu` naming the failing
    /// field for composite types.
    pub fn norm(&self, lib: &TypeLib, raw: &Valu) -> Result<Norm, StoreError> {
        self.kind.norm(&self.name, lib, raw)
    }

    /// Canonical index bytes of a normalized value.
    pub fn indx(&self, lib: &TypeLib, valu: &Valu) -> Result<Vec<u8>, StoreError> {
        self.kind.indx(&self.name, lib, valu)
    }

    /// Human-readable rendering of a normalized value.
    #[must_use]
    pub fn repr(&self, lib: &TypeLib, valu: &Valu) -> String {
        self.kind.repr(lib, valu)
    }

    /// Whether range scans over this type's index are ordered.
    #[must_use]
    pub fn is_ranged(&self) -> bool {
        self.kind.is_ranged()
    }

    /// Index bytes of a string prefix, for prefix scans over `str`/`hex`.
    pub fn norm_prefix(&self, text: &str) -> Result<Vec<u8>, StoreError> {
        match &self.kind {
            TypeKind::Str { lower, .. } => {
                let text = if *lower {
                    text.to_lowercase()
                } else {
                    text.to_string()
                };
                Ok(text.into_bytes())
            }
            TypeKind::Hex { .. } => {
                let text = text.trim().to_lowercase();
                Ok(text.strip_prefix("0x").unwrap_or(&text).as_bytes().to_vec())
            }
            TypeKind::Loc => Ok(loc_indx(&loc_parts(&self.name, text)?)),
            _ => Err(StoreError::bad_valu(
                &self.name,
                "type does not support prefix queries",
            )),
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Registry table: type name → type, plus full prop name → prop type.
#[derive(Debug)]
pub struct TypeLib {
    types: BTreeMap<String, Arc<Type>>,
    props: BTreeMap<String, Arc<Type>>,
}

impl Default for TypeLib {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeLib {
    /// A registry holding only the built-in base kinds.
    #[must_use]
    pub fn new() -> Self {
        let types = BaseKind::ALL
            .iter()
            .map(|base| (base.name().to_string(), Arc::new(Type::builtin(*base))))
            .collect();
        Self {
            types,
            props: BTreeMap::new(),
        }
    }

    /// Look up a type by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<Type>> {
        self.types.get(name)
    }

    /// Look up a type by name, failing with `NoSuchType`.
    pub fn req(&self, name: &str) -> Result<&Arc<Type>, StoreError> {
        self.get(name)
            .ok_or_else(|| StoreError::NoSuchType(name.to_string()))
    }

    /// The type of a property by its full name (a form name for the
    /// primary value).
    #[must_use]
    pub fn prop_type(&self, full: &str) -> Option<&Arc<Type>> {
        self.props.get(full)
    }

    /// Iterate registered type names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Normalize `raw` with the named type.
    pub fn norm(&self, name: &str, raw: &Valu) -> Result<Norm, StoreError> {
        self.req(name)?.norm(self, raw)
    }

    /// Resolve a type reference. A bare name shares the registered type; a
    /// reference with options yields an anonymous derivation of it.
    pub fn resolve_spec(&self, spec: &TypeSpec) -> Result<Arc<Type>, StoreError> {
        let base = self.req(&spec.0)?;
        if spec.1.is_empty() {
            return Ok(Arc::clone(base));
        }
        let derived = base.derive(&spec.0, &spec.1, None, self)?;
        Ok(Arc::new(derived))
    }

    /// Register a constructor: a named type built directly on a base kind.
    pub(crate) fn add_ctor(
        &mut self,
        name: &str,
        base: &str,
        opts: &TypeOpts,
        doc: Option<String>,
    ) -> Result<(), StoreError> {
        self.ensure_free(name)?;
        let kind = BaseKind::parse(base).ok_or_else(|| StoreError::NoSuchType(base.to_string()))?;
        let ty = Type::builtin(kind).derive(name, opts, doc, self)?;
        self.types.insert(name.to_string(), Arc::new(ty));
        Ok(())
    }

    /// Register a named type derived from an already registered one.
    pub(crate) fn add_type(
        &mut self,
        name: &str,
        spec: &TypeSpec,
        doc: Option<String>,
    ) -> Result<(), StoreError> {
        self.ensure_free(name)?;
        let ty = self.req(&spec.0)?.derive(name, &spec.1, doc, self)?;
        self.types.insert(name.to_string(), Arc::new(ty));
        Ok(())
    }

    /// Record the type of a resolved property.
    pub(crate) fn add_prop_type(&mut self, full: &str, ty: Arc<Type>) {
        self.props.insert(full.to_string(), ty);
    }

    /// Type names double as form names and index namespaces, so they may
    /// not contain prop (`:`, `.`) or key (`\0`) separators.
    fn ensure_free(&self, name: &str) -> Result<(), StoreError> {
        if name.is_empty() || name.contains(['\0', ':', '.']) {
            return Err(StoreError::BadSchema(format!("invalid type name {:?}", name)));
        }
        if self.types.contains_key(name) {
            return Err(StoreError::BadSchema(format!("duplicate type {}", name)));
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(json: serde_json::Value) -> TypeOpts {
        match json {
            serde_json::Value::Object(map) => map,
            _ => TypeOpts::new(),
        }
    }

    fn lib_with_comp() -> TypeLib {
        let mut lib = TypeLib::new();
        lib.add_type("testint", &TypeSpec::named("int"), None)
            .expect("testint");
        lib.add_type(
            "testlower",
            &TypeSpec("str".into(), opts(serde_json::json!({"lower": true}))),
            None,
        )
        .expect("testlower");
        lib.add_type(
            "testcomp",
            &TypeSpec(
                "comp".into(),
                opts(serde_json::json!({"fields": [["hehe", "testint"], ["haha", "testlower"]]})),
            ),
            Some("A fake comp type.".into()),
        )
        .expect("testcomp");
        lib
    }

    #[test]
    fn builtins_are_registered() {
        let lib = TypeLib::new();
        let names: Vec<_> = lib.names().collect();
        assert_eq!(
            names,
            vec![
                "bool", "comp", "guid", "hex", "int", "loc", "ndef", "nodeprop", "str", "time"
            ]
        );
    }

    #[test]
    fn int_bounds() {
        let mut lib = TypeLib::new();
        lib.add_type(
            "bounded",
            &TypeSpec("int".into(), opts(serde_json::json!({"min": 20, "max": 30}))),
            None,
        )
        .expect("bounded");

        assert_eq!(lib.norm("bounded", &Valu::Int(25)).expect("25").valu, Valu::Int(25));
        assert!(lib.norm("bounded", &Valu::Int(31)).is_err());
        assert!(lib.norm("bounded", &Valu::Int(19)).is_err());
    }

    #[test]
    fn inverted_bounds_rejected() {
        let mut lib = TypeLib::new();
        let result = lib.add_type(
            "bad",
            &TypeSpec("int".into(), opts(serde_json::json!({"min": 5, "max": 1}))),
            None,
        );
        assert!(matches!(result, Err(StoreError::BadSchema(_))));
    }

    #[test]
    fn str_lower_and_enums() {
        let mut lib = TypeLib::new();
        lib.add_type(
            "color",
            &TypeSpec(
                "str".into(),
                opts(serde_json::json!({"lower": 1, "strip": 1, "enums": "red,green"})),
            ),
            None,
        )
        .expect("color");

        let norm = lib.norm("color", &Valu::from("  RED ")).expect("red");
        assert_eq!(norm.valu, Valu::from("red"));
        assert!(lib.norm("color", &Valu::from("blue")).is_err());
    }

    #[test]
    fn guid_validation_and_generation() {
        let lib = TypeLib::new();
        let good = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
        let norm = lib.norm("guid", &Valu::from(good)).expect("guid");
        assert_eq!(norm.valu, Valu::from(good.to_lowercase()));
        assert!(lib.norm("guid", &Valu::from("visi")).is_err());

        let a = lib.norm("guid", &Valu::from("*")).expect("random a");
        let b = lib.norm("guid", &Valu::from("*")).expect("random b");
        assert_ne!(a.valu, b.valu);

        let list = Valu::List(vec![Valu::from("foo"), Valu::Int(10)]);
        let c = lib.norm("guid", &list).expect("stable c");
        let d = lib.norm("guid", &list).expect("stable d");
        assert_eq!(c.valu, d.valu);

        let indx = lib.req("guid").expect("type").indx(&lib, &c.valu).expect("indx");
        assert_eq!(indx.len(), 16);
    }

    #[test]
    fn hex_size() {
        let mut lib = TypeLib::new();
        lib.add_type(
            "testhex4",
            &TypeSpec("hex".into(), opts(serde_json::json!({"size": 4}))),
            None,
        )
        .expect("hex4");

        assert_eq!(
            lib.norm("testhex4", &Valu::from("0xBEEF")).expect("beef").valu,
            Valu::from("beef")
        );
        assert_eq!(
            lib.norm("testhex4", &Valu::Int(0x1f)).expect("int").valu,
            Valu::from("001f")
        );
        assert!(lib.norm("testhex4", &Valu::from("beefy")).is_err());
        assert!(lib.norm("testhex4", &Valu::from("12345")).is_err());
    }

    #[test]
    fn bool_norm_and_repr() {
        let lib = TypeLib::new();
        let ty = lib.req("bool").expect("bool");
        let t = ty.norm(&lib, &Valu::from("TRUE")).expect("true");
        assert_eq!(t.valu, Valu::Int(1));
        assert_eq!(ty.repr(&lib, &t.valu), "true");
        assert!(ty.norm(&lib, &Valu::from("maybe")).is_err());
    }

    #[test]
    fn comp_norm_subs_and_indx() {
        let lib = lib_with_comp();
        let ty = lib.req("testcomp").expect("comp");
        let raw = Valu::List(vec![Valu::from("10"), Valu::from("HAHA")]);
        let norm = ty.norm(&lib, &raw).expect("norm");

        assert_eq!(
            norm.valu,
            Valu::List(vec![Valu::Int(10), Valu::from("haha")])
        );
        assert_eq!(norm.subs.get("hehe"), Some(&Valu::Int(10)));
        assert_eq!(norm.subs.get("haha"), Some(&Valu::from("haha")));
        assert_eq!(ty.repr(&lib, &norm.valu), "(10, haha)");

        let indx = ty.indx(&lib, &norm.valu).expect("indx");
        // two framed fields: 4 + 8 and 4 + 4
        assert_eq!(indx.len(), 20);
    }

    #[test]
    fn comp_reports_failing_field() {
        let lib = lib_with_comp();
        let raw = Valu::List(vec![Valu::from("notanint"), Valu::from("haha")]);
        match lib.norm("testcomp", &raw) {
            Err(StoreError::BadTypeValu { field, .. }) => assert_eq!(field, "hehe"),
            other => unreachable!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn comp_arity_checked() {
        let lib = lib_with_comp();
        let raw = Valu::List(vec![Valu::Int(1)]);
        assert!(matches!(
            lib.norm("testcomp", &raw),
            Err(StoreError::BadTypeValu { .. })
        ));
    }

    #[test]
    fn ndef_normalizes_through_target_type() {
        let lib = lib_with_comp();
        let raw = Valu::List(vec![Valu::from("testlower"), Valu::from("VISI")]);
        let norm = lib.norm("ndef", &raw).expect("ndef");
        assert_eq!(
            norm.valu,
            Valu::List(vec![Valu::from("testlower"), Valu::from("visi")])
        );

        let missing = Valu::List(vec![Valu::from("nope"), Valu::from("x")]);
        assert!(lib.norm("ndef", &missing).is_err());
    }

    #[test]
    fn duplicate_type_rejected() {
        let mut lib = TypeLib::new();
        let result = lib.add_type("int", &TypeSpec::named("int"), None);
        assert!(matches!(result, Err(StoreError::BadSchema(_))));
    }

    #[test]
    fn ctor_builds_on_base_kind() {
        let mut lib = TypeLib::new();
        lib.add_ctor(
            "testtype",
            "str",
            &opts(serde_json::json!({"lower": true})),
            None,
        )
        .expect("ctor");
        assert_eq!(
            lib.norm("testtype", &Valu::from("HeHe")).expect("norm").valu,
            Valu::from("hehe")
        );
        assert!(matches!(
            lib.add_ctor("other", "inet", &TypeOpts::new(), None),
            Err(StoreError::NoSuchType(_))
        ));
    }

    #[test]
    fn type_names_exclude_separators() {
        let mut lib = TypeLib::new();
        for bad in ["", "a:b", "a.b", "a\0b"] {
            assert!(matches!(
                lib.add_type(bad, &TypeSpec::named("str"), None),
                Err(StoreError::BadSchema(_))
            ));
            assert!(matches!(
                lib.add_ctor(bad, "str", &TypeOpts::new(), None),
                Err(StoreError::BadSchema(_))
            ));
        }
    }

    #[test]
    fn nodeprop_normalizes_through_prop_type() {
        let mut lib = lib_with_comp();
        let lower = Arc::clone(lib.req("testlower").expect("lower"));
        lib.add_prop_type("thing:name", lower);

        let raw = Valu::List(vec![Valu::from("thing:name"), Valu::from("VISI")]);
        let norm = lib.norm("nodeprop", &raw).expect("list");
        assert_eq!(
            norm.valu,
            Valu::List(vec![Valu::from("thing:name"), Valu::from("visi")])
        );
        assert_eq!(norm.subs.get("prop"), Some(&Valu::from("thing:name")));
        assert_eq!(lib.norm("nodeprop", &Valu::from("thing:name=Visi")).expect("text"), norm);

        let ty = lib.req("nodeprop").expect("nodeprop");
        let indx = ty.indx(&lib, &norm.valu).expect("indx");
        // framed "thing:name" then framed "visi"
        assert_eq!(indx.len(), 4 + 10 + 4 + 4);
        assert_eq!(ty.repr(&lib, &norm.valu), "(thing:name, visi)");

        let missing = Valu::List(vec![Valu::from("thing:nope"), Valu::from("x")]);
        assert!(lib.norm("nodeprop", &missing).is_err());
        assert!(lib.norm("nodeprop", &Valu::from("no separator")).is_err());
    }

    #[test]
    fn loc_folds_case_and_prefixes_by_segment() {
        let lib = TypeLib::new();
        let ty = lib.req("loc").expect("loc");
        let norm = ty.norm(&lib, &Valu::from("US. VA .Reston")).expect("loc");
        assert_eq!(norm.valu, Valu::from("us.va.reston"));
        assert!(ty.norm(&lib, &Valu::from("us..va")).is_err());

        let indx = ty.indx(&lib, &norm.valu).expect("indx");
        let prefix = ty.norm_prefix("US.va").expect("prefix");
        assert!(indx.starts_with(&prefix));
        let sibling = ty.indx(&lib, &Valu::from("us.vaz")).expect("sibling");
        assert!(!sibling.starts_with(&prefix));
    }

    #[test]
    fn prefix_only_for_strings() {
        let lib = lib_with_comp();
        let lower = lib.req("testlower").expect("lower");
        assert_eq!(lower.norm_prefix("HE").expect("prefix"), b"he".to_vec());
        assert!(lib.req("int").expect("int").norm_prefix("1").is_err());
    }
}
