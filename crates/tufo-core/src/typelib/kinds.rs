//! # Type Kinds
//!
//! Each `TypeKind` variant implements exactly three operations:
//! - `norm`: coerce raw input into the canonical normalized value
//! - `indx`: the deterministic, sortable byte encoding of a normalized value
//! - `repr`: a human-readable rendering
//!
//! Options (`min`, `lower`, `size`, `fields`, ...) are parsed once when the
//! type is registered and carried inside the variant.

use super::{Norm, Type, TypeLib, TypeOpts, TypeSpec, time};
use crate::{StoreError, Valu};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// The built-in base kinds every type derives from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BaseKind {
    Int,
    Str,
    Bool,
    Time,
    Guid,
    Hex,
    Comp,
    Ndef,
    Nodeprop,
    Loc,
}

impl BaseKind {
    /// Every base kind, in registration order.
    pub const ALL: [BaseKind; 10] = [
        Self::Int,
        Self::Str,
        Self::Bool,
        Self::Time,
        Self::Guid,
        Self::Hex,
        Self::Comp,
        Self::Ndef,
        Self::Nodeprop,
        Self::Loc,
    ];

    /// Look up a base kind by its schema name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// The schema name of this kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Str => "str",
            Self::Bool => "bool",
            Self::Time => "time",
            Self::Guid => "guid",
            Self::Hex => "hex",
            Self::Comp => "comp",
            Self::Ndef => "ndef",
            Self::Nodeprop => "nodeprop",
            Self::Loc => "loc",
        }
    }
}

/// One named, typed field of a composite type.
#[derive(Debug, Clone)]
pub struct CompField {
    pub name: String,
    pub ty: Arc<Type>,
}

/// A base kind with its parsed options.
#[derive(Debug, Clone)]
pub enum TypeKind {
    Int {
        min: Option<i64>,
        max: Option<i64>,
    },
    Str {
        lower: bool,
        strip: bool,
        enums: Option<BTreeSet<String>>,
    },
    Bool,
    Time,
    Guid,
    Hex {
        size: Option<usize>,
    },
    Comp {
        fields: Vec<CompField>,
    },
    Ndef,
    /// A `(full-prop-name, value)` pair; the value is typed by the prop.
    Nodeprop,
    /// A dotted, lower case location (`us.va.reston`).
    Loc,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FieldSpec {
    Name(String),
    Spec(TypeSpec),
}

impl TypeKind {
    /// The option-free variant of a base kind.
    pub(crate) fn bare(base: BaseKind) -> Self {
        match base {
            BaseKind::Int => Self::Int {
                min: None,
                max: None,
            },
            BaseKind::Str => Self::Str {
                lower: false,
                strip: false,
                enums: None,
            },
            BaseKind::Bool => Self::Bool,
            BaseKind::Time => Self::Time,
            BaseKind::Guid => Self::Guid,
            BaseKind::Hex => Self::Hex { size: None },
            BaseKind::Comp => Self::Comp { fields: Vec::new() },
            BaseKind::Ndef => Self::Ndef,
            BaseKind::Nodeprop => Self::Nodeprop,
            BaseKind::Loc => Self::Loc,
        }
    }

    /// Build the variant for `base` from a merged option set.
    pub(crate) fn from_opts(
        base: BaseKind,
        opts: &TypeOpts,
        lib: &TypeLib,
    ) -> Result<Self, StoreError> {
        let kind = match base {
            BaseKind::Int => {
                let min = opt_int(opts, "min")?;
                let max = opt_int(opts, "max")?;
                if let (Some(lo), Some(hi)) = (min, max)
                    && lo > hi
                {
                    return Err(StoreError::BadSchema(format!(
                        "int bounds inverted: min {} > max {}",
                        lo, hi
                    )));
                }
                Self::Int { min, max }
            }
            BaseKind::Str => {
                let enums = opt_str(opts, "enums")?.map(|list| {
                    list.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect::<BTreeSet<_>>()
                });
                Self::Str {
                    lower: opt_truthy(opts, "lower"),
                    strip: opt_truthy(opts, "strip"),
                    enums,
                }
            }
            BaseKind::Bool => Self::Bool,
            BaseKind::Time => Self::Time,
            BaseKind::Guid => Self::Guid,
            BaseKind::Hex => {
                let size = opt_int(opts, "size")?
                    .map(|s| {
                        usize::try_from(s)
                            .ok()
                            .filter(|s| *s > 0)
                            .ok_or_else(|| StoreError::BadSchema(format!("bad hex size {}", s)))
                    })
                    .transpose()?;
                Self::Hex { size }
            }
            BaseKind::Comp => {
                let fields = match opts.get("fields") {
                    None => Vec::new(),
                    Some(raw) => {
                        let specs: Vec<(String, FieldSpec)> = serde_json::from_value(raw.clone())?;
                        let mut fields = Vec::with_capacity(specs.len());
                        let mut seen = BTreeSet::new();
                        for (name, spec) in specs {
                            if !seen.insert(name.clone()) {
                                return Err(StoreError::BadSchema(format!(
                                    "duplicate comp field {}",
                                    name
                                )));
                            }
                            let spec = match spec {
                                FieldSpec::Name(n) => TypeSpec(n, TypeOpts::new()),
                                FieldSpec::Spec(s) => s,
                            };
                            let ty = lib.resolve_spec(&spec)?;
                            fields.push(CompField { name, ty });
                        }
                        fields
                    }
                };
                Self::Comp { fields }
            }
            BaseKind::Ndef => Self::Ndef,
            BaseKind::Nodeprop => Self::Nodeprop,
            BaseKind::Loc => Self::Loc,
        };
        Ok(kind)
    }

    /// Whether index bytes of this kind sort in value order, so range
    /// scans over them are meaningful.
    #[must_use]
    pub fn is_ranged(&self) -> bool {
        matches!(self, Self::Int { .. } | Self::Time | Self::Bool)
    }

    // =========================================================================
    // NORMALIZE
    // =========================================================================

    pub(crate) fn norm(&self, name: &str, lib: &TypeLib, raw: &Valu) -> Result<Norm, StoreError> {
        match self {
            Self::Int { min, max } => {
                let v = match raw {
                    Valu::Int(v) => *v,
                    Valu::Str(s) => parse_int(s).map_err(|m| StoreError::bad_valu(name, m))?,
                    Valu::List(_) => return Err(StoreError::bad_valu(name, "list is not an int")),
                };
                if let Some(lo) = min
                    && v < *lo
                {
                    return Err(StoreError::bad_valu(
                        name,
                        format!("{} is below minimum {}", v, lo),
                    ));
                }
                if let Some(hi) = max
                    && v > *hi
                {
                    return Err(StoreError::bad_valu(
                        name,
                        format!("{} is above maximum {}", v, hi),
                    ));
                }
                Ok(Norm::new(Valu::Int(v)))
            }
            Self::Str {
                lower,
                strip,
                enums,
            } => {
                let mut text = match raw {
                    Valu::Str(s) => s.clone(),
                    Valu::Int(v) => v.to_string(),
                    Valu::List(_) => return Err(StoreError::bad_valu(name, "list is not a str")),
                };
                if *strip {
                    text = text.trim().to_string();
                }
                if *lower {
                    text = text.to_lowercase();
                }
                if let Some(allowed) = enums
                    && !allowed.contains(&text)
                {
                    return Err(StoreError::bad_valu(
                        name,
                        format!("{:?} is not one of the allowed values", text),
                    ));
                }
                Ok(Norm::new(Valu::Str(text)))
            }
            Self::Bool => {
                let v = match raw {
                    Valu::Int(v) => *v != 0,
                    Valu::Str(s) => match s.trim().to_lowercase().as_str() {
                        "true" | "1" | "yes" => true,
                        "false" | "0" | "no" => false,
                        other => {
                            return Err(StoreError::bad_valu(
                                name,
                                format!("{:?} is not a bool", other),
                            ));
                        }
                    },
                    Valu::List(_) => return Err(StoreError::bad_valu(name, "list is not a bool")),
                };
                Ok(Norm::new(Valu::Int(i64::from(v))))
            }
            Self::Time => {
                let v = match raw {
                    Valu::Int(v) => *v,
                    Valu::Str(s) => time::parse(s).map_err(|m| StoreError::bad_valu(name, m))?,
                    Valu::List(_) => return Err(StoreError::bad_valu(name, "list is not a time")),
                };
                Ok(Norm::new(Valu::Int(v)))
            }
            Self::Guid => {
                let text = match raw {
                    Valu::Str(s) if s == "*" => uuid::Uuid::new_v4().simple().to_string(),
                    Valu::Str(s) => {
                        let s = s.trim().to_lowercase();
                        if s.len() != 32 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
                            return Err(StoreError::bad_valu(
                                name,
                                format!("{:?} is not a 32 character hex guid", s),
                            ));
                        }
                        s
                    }
                    Valu::List(_) => {
                        let bytes = postcard::to_allocvec(raw)?;
                        let digest = blake3::hash(&bytes);
                        hex::encode(&digest.as_bytes()[..16])
                    }
                    Valu::Int(_) => return Err(StoreError::bad_valu(name, "int is not a guid")),
                };
                Ok(Norm::new(Valu::Str(text)))
            }
            Self::Hex { size } => {
                let text = match raw {
                    Valu::Str(s) => {
                        let s = s.trim().to_lowercase();
                        let s = s.strip_prefix("0x").unwrap_or(&s).to_string();
                        if s.is_empty() || !s.chars().all(|c| c.is_ascii_hexdigit()) {
                            return Err(StoreError::bad_valu(
                                name,
                                format!("{:?} is not hex", s),
                            ));
                        }
                        s
                    }
                    Valu::Int(v) if *v >= 0 => match size {
                        Some(width) => format!("{:0width$x}", v, width = *width),
                        None => format!("{:x}", v),
                    },
                    Valu::Int(v) => {
                        return Err(StoreError::bad_valu(
                            name,
                            format!("negative int {} is not hex", v),
                        ));
                    }
                    Valu::List(_) => return Err(StoreError::bad_valu(name, "list is not hex")),
                };
                if let Some(width) = size
                    && text.len() != *width
                {
                    return Err(StoreError::bad_valu(
                        name,
                        format!("expected {} hex digits, got {}", width, text.len()),
                    ));
                }
                Ok(Norm::new(Valu::Str(text)))
            }
            Self::Comp { fields } => {
                let items = raw
                    .as_list()
                    .ok_or_else(|| StoreError::bad_valu(name, "comp value must be a list"))?;
                if items.len() != fields.len() {
                    return Err(StoreError::bad_valu(
                        name,
                        format!("expected {} fields, got {}", fields.len(), items.len()),
                    ));
                }
                let mut valus = Vec::with_capacity(fields.len());
                let mut subs = BTreeMap::new();
                for (field, item) in fields.iter().zip(items) {
                    let sub = field
                        .ty
                        .norm(lib, item)
                        .map_err(|e| e.within_field(&field.name))?;
                    subs.insert(field.name.clone(), sub.valu.clone());
                    valus.push(sub.valu);
                }
                Ok(Norm {
                    valu: Valu::List(valus),
                    subs,
                })
            }
            Self::Ndef => {
                let (form, item) = split_ndef(name, raw)?;
                let ty = lib
                    .get(form)
                    .ok_or_else(|| StoreError::bad_valu(name, format!("no such form {}", form)))?;
                let sub = ty.norm(lib, item).map_err(|e| e.within_field(form))?;
                let mut subs = BTreeMap::new();
                subs.insert("form".to_string(), Valu::Str(form.to_string()));
                Ok(Norm {
                    valu: Valu::List(vec![Valu::Str(form.to_string()), sub.valu]),
                    subs,
                })
            }
            Self::Nodeprop => {
                let (prop, item) = match raw {
                    Valu::Str(text) => {
                        let (prop, item) = text.split_once('=').ok_or_else(|| {
                            StoreError::bad_valu(name, "nodeprop text must be prop=valu")
                        })?;
                        (prop.trim(), Valu::from(item))
                    }
                    _ => {
                        let (prop, item) = split_nodeprop(name, raw)?;
                        (prop, item.clone())
                    }
                };
                let ty = lib
                    .prop_type(prop)
                    .ok_or_else(|| StoreError::bad_valu(name, format!("no such prop {}", prop)))?;
                let sub = ty.norm(lib, &item).map_err(|e| e.within_field(prop))?;
                let mut subs = BTreeMap::new();
                subs.insert("prop".to_string(), Valu::Str(prop.to_string()));
                Ok(Norm {
                    valu: Valu::List(vec![Valu::Str(prop.to_string()), sub.valu]),
                    subs,
                })
            }
            Self::Loc => {
                let text = raw
                    .as_str()
                    .ok_or_else(|| StoreError::bad_valu(name, "loc must be a str"))?;
                let parts = loc_parts(name, text)?;
                Ok(Norm::new(Valu::Str(parts.join("."))))
            }
        }
    }

    // =========================================================================
    // INDEX
    // =========================================================================

    pub(crate) fn indx(&self, name: &str, lib: &TypeLib, valu: &Valu) -> Result<Vec<u8>, StoreError> {
        match self {
            Self::Int { .. } | Self::Time | Self::Bool => {
                let v = valu
                    .as_int()
                    .ok_or_else(|| StoreError::bad_valu(name, "not a normalized int"))?;
                Ok(int_indx(v).to_vec())
            }
            Self::Str { .. } | Self::Hex { .. } => {
                let s = valu
                    .as_str()
                    .ok_or_else(|| StoreError::bad_valu(name, "not a normalized str"))?;
                Ok(s.as_bytes().to_vec())
            }
            Self::Guid => {
                let s = valu
                    .as_str()
                    .ok_or_else(|| StoreError::bad_valu(name, "not a normalized guid"))?;
                hex::decode(s).map_err(|e| StoreError::bad_valu(name, e.to_string()))
            }
            Self::Comp { fields } => {
                let items = valu
                    .as_list()
                    .filter(|items| items.len() == fields.len())
                    .ok_or_else(|| StoreError::bad_valu(name, "not a normalized comp"))?;
                let mut out = Vec::new();
                for (field, item) in fields.iter().zip(items) {
                    let sub = field
                        .ty
                        .indx(lib, item)
                        .map_err(|e| e.within_field(&field.name))?;
                    push_framed(&mut out, &sub);
                }
                Ok(out)
            }
            Self::Ndef => {
                let (form, item) = split_ndef(name, valu)?;
                let ty = lib
                    .get(form)
                    .ok_or_else(|| StoreError::bad_valu(name, format!("no such form {}", form)))?;
                let mut out = Vec::new();
                push_framed(&mut out, form.as_bytes());
                push_framed(&mut out, &ty.indx(lib, item)?);
                Ok(out)
            }
            Self::Nodeprop => {
                let (prop, item) = split_nodeprop(name, valu)?;
                let ty = lib
                    .prop_type(prop)
                    .ok_or_else(|| StoreError::bad_valu(name, format!("no such prop {}", prop)))?;
                let mut out = Vec::new();
                push_framed(&mut out, prop.as_bytes());
                push_framed(&mut out, &ty.indx(lib, item)?);
                Ok(out)
            }
            Self::Loc => {
                let s = valu
                    .as_str()
                    .ok_or_else(|| StoreError::bad_valu(name, "not a normalized loc"))?;
                Ok(loc_indx(&loc_parts(name, s)?))
            }
        }
    }

    // =========================================================================
    // REPRESENT
    // =========================================================================

    pub(crate) fn repr(&self, lib: &TypeLib, valu: &Valu) -> String {
        match (self, valu) {
            (Self::Bool, Valu::Int(v)) => (if *v != 0 { "true" } else { "false" }).to_string(),
            (Self::Time, Valu::Int(v)) => time::repr(*v),
            (Self::Comp { fields }, Valu::List(items)) if items.len() == fields.len() => {
                let parts: Vec<String> = fields
                    .iter()
                    .zip(items)
                    .map(|(field, item)| field.ty.repr(lib, item))
                    .collect();
                format!("({})", parts.join(", "))
            }
            (Self::Ndef, Valu::List(items)) => match items.as_slice() {
                [Valu::Str(form), item] => match lib.get(form) {
                    Some(ty) => format!("({}, {})", form, ty.repr(lib, item)),
                    None => valu.to_string(),
                },
                _ => valu.to_string(),
            },
            (Self::Nodeprop, Valu::List(items)) => match items.as_slice() {
                [Valu::Str(prop), item] => match lib.prop_type(prop) {
                    Some(ty) => format!("({}, {})", prop, ty.repr(lib, item)),
                    None => valu.to_string(),
                },
                _ => valu.to_string(),
            },
            _ => valu.to_string(),
        }
    }
}

// =============================================================================
// ENCODING HELPERS
// =============================================================================

/// Order-preserving encoding of a signed integer: big-endian with the sign
/// bit flipped, so byte order matches numeric order.
#[must_use]
pub fn int_indx(v: i64) -> [u8; 8] {
    ((v as u64) ^ (1u64 << 63)).to_be_bytes()
}

/// Append a 4-byte big-endian length header followed by `bytes`.
fn push_framed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn split_ndef<'a>(name: &str, valu: &'a Valu) -> Result<(&'a str, &'a Valu), StoreError> {
    match valu.as_list() {
        Some([Valu::Str(form), item]) => Ok((form.as_str(), item)),
        _ => Err(StoreError::bad_valu(name, "ndef must be a (form, value) pair")),
    }
}

fn split_nodeprop<'a>(name: &str, valu: &'a Valu) -> Result<(&'a str, &'a Valu), StoreError> {
    match valu.as_list() {
        Some([Valu::Str(prop), item]) => Ok((prop.as_str(), item)),
        _ => Err(StoreError::bad_valu(name, "nodeprop must be a (prop, value) pair")),
    }
}

/// Lower case, trimmed location segments. Empty segments are rejected.
pub(crate) fn loc_parts(name: &str, text: &str) -> Result<Vec<String>, StoreError> {
    let parts: Vec<String> = text
        .split('.')
        .map(|part| part.trim().to_lowercase())
        .collect();
    if parts.iter().any(|part| part.is_empty() || part.contains('\0')) {
        return Err(StoreError::bad_valu(
            name,
            format!("{:?} is not a dotted location", text),
        ));
    }
    Ok(parts)
}

/// Each segment is terminated by `0x00`, so a prefix of whole segments
/// never matches a longer sibling (`us.va` vs `us.vaz`).
pub(crate) fn loc_indx(parts: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(part.as_bytes());
        out.push(0);
    }
    out
}

fn parse_int(text: &str) -> Result<i64, String> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => text.parse::<i64>(),
    };
    parsed.map_err(|e| format!("{:?} is not an int: {}", text, e))
}

// =============================================================================
// OPTION HELPERS
// =============================================================================

fn opt_int(opts: &TypeOpts, key: &str) -> Result<Option<i64>, StoreError> {
    match opts.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| StoreError::BadSchema(format!("option {} must be an int", key))),
    }
}

fn opt_str<'a>(opts: &'a TypeOpts, key: &str) -> Result<Option<&'a str>, StoreError> {
    match opts.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .map(Some)
            .ok_or_else(|| StoreError::BadSchema(format!("option {} must be a str", key))),
    }
}

/// Schema flags may be written as booleans or as 0/1.
pub(crate) fn opt_truthy(opts: &TypeOpts, key: &str) -> bool {
    match opts.get(key) {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_indx_preserves_order_across_zero() {
        assert!(int_indx(-1) < int_indx(0));
        assert!(int_indx(i64::MIN) < int_indx(-1));
        assert!(int_indx(0) < int_indx(i64::MAX));
    }

    #[test]
    fn parse_int_accepts_hex() {
        assert_eq!(parse_int("0x10"), Ok(16));
        assert_eq!(parse_int(" 42 "), Ok(42));
        assert!(parse_int("hehe").is_err());
    }

    #[test]
    fn base_kind_names_roundtrip() {
        for kind in BaseKind::ALL {
            assert_eq!(BaseKind::parse(kind.name()), Some(kind));
        }
        assert_eq!(BaseKind::parse("inet"), None);
    }

    #[test]
    fn loc_segments_terminate() {
        let parts = loc_parts("loc", " US. Va ").expect("parts");
        assert_eq!(parts, vec!["us".to_string(), "va".to_string()]);
        assert_eq!(loc_indx(&parts), b"us\0va\0".to_vec());
        assert!(loc_parts("loc", "us..va").is_err());
        assert!(loc_parts("loc", "").is_err());
    }

    #[test]
    fn truthy_accepts_ints() {
        let mut opts = TypeOpts::new();
        opts.insert("lower".to_string(), serde_json::json!(1));
        opts.insert("strip".to_string(), serde_json::json!(false));
        assert!(opt_truthy(&opts, "lower"));
        assert!(!opt_truthy(&opts, "strip"));
        assert!(!opt_truthy(&opts, "missing"));
    }
}
