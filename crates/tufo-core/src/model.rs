//! # Model
//!
//! The registry of node schemas ("forms") and the declarative schema input
//! they are built from.
//!
//! A model is built exactly once by [`ModelBuilder`] from one or more
//! [`ModelDef`]s and is immutable afterwards; the store shares it behind an
//! `Arc`.
//!
//! ## Schema layout (JSON)
//!
//! ```text
//! {
//!   "ctors": [[name, base-kind, {opts}, {info}]],
//!   "types": [[name, [base-type, {opts}], {info}]],
//!   "forms": [[name, {info}, [[prop, [type, {opts}], {ro, defval, doc}]]]]
//! }
//! ```
//!
//! A form's primary type is the type registered under the form's name.

use crate::node::full_prop_name;
use crate::primitives::UNIV_CREATED;
use crate::typelib::{BaseKind, Type, TypeLib, TypeOpts, TypeSpec};
use crate::{StoreError, Valu};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

// =============================================================================
// DECLARATIVE SCHEMA
// =============================================================================

/// One named section of schema: constructors, derived types and forms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDef {
    #[serde(default)]
    pub ctors: Vec<CtorDef>,
    #[serde(default)]
    pub types: Vec<TypeDef>,
    #[serde(default)]
    pub forms: Vec<FormDef>,
}

impl ModelDef {
    /// Parse a schema section from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// `[name, base-kind, {opts}, {info}]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CtorDef(pub String, pub String, pub TypeOpts, pub Info);

/// `[name, [base-type, {opts}], {info}]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef(pub String, pub TypeSpec, pub Info);

/// `[name, {info}, [prop, ...]]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormDef(pub String, pub Info, pub Vec<PropDef>);

/// `[name, [type, {opts}], {ro, defval, doc}]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropDef(pub String, pub TypeSpec, pub PropInfo);

/// Documentation attached to a type or form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Info {
    #[serde(default)]
    pub doc: Option<String>,
}

/// Per-property metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropInfo {
    #[serde(default, deserialize_with = "de_truthy")]
    pub ro: bool,
    #[serde(default)]
    pub defval: Option<serde_json::Value>,
    #[serde(default)]
    pub doc: Option<String>,
}

/// Schema flags may be written as `true` or `1`.
fn de_truthy<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(match raw {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_i64().is_some_and(|v| v != 0),
        _ => false,
    })
}

// =============================================================================
// FORMS AND PROPS
// =============================================================================

/// A secondary property of a form.
#[derive(Debug, Clone)]
pub struct Prop {
    name: String,
    full: String,
    form: String,
    ty: Arc<Type>,
    ro: bool,
    univ: bool,
    defval: Option<Valu>,
    doc: Option<String>,
    pivot: Option<String>,
}

impl Prop {
    /// Relative name (`intprop`, `.created`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full dotted name (`widget:intprop`, `widget.created`).
    #[must_use]
    pub fn full(&self) -> &str {
        &self.full
    }

    #[must_use]
    pub fn form(&self) -> &str {
        &self.form
    }

    #[must_use]
    pub fn ty(&self) -> &Arc<Type> {
        &self.ty
    }

    #[must_use]
    pub fn is_ro(&self) -> bool {
        self.ro
    }

    /// Universal props are maintained by the store, not the caller.
    #[must_use]
    pub fn is_univ(&self) -> bool {
        self.univ
    }

    /// Raw default value, normalized per node at creation time.
    #[must_use]
    pub fn defval(&self) -> Option<&Valu> {
        self.defval.as_ref()
    }

    #[must_use]
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// The form this property points at, when its type is a form's primary
    /// type.
    #[must_use]
    pub fn pivot_form(&self) -> Option<&str> {
        self.pivot.as_deref()
    }
}

/// A node schema.
#[derive(Debug, Clone)]
pub struct Form {
    name: String,
    ty: Arc<Type>,
    props: Vec<Prop>,
    by_name: BTreeMap<String, usize>,
    doc: Option<String>,
}

impl Form {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The primary type.
    #[must_use]
    pub fn ty(&self) -> &Arc<Type> {
        &self.ty
    }

    /// Properties in declaration order (universal props first).
    #[must_use]
    pub fn props(&self) -> &[Prop] {
        &self.props
    }

    #[must_use]
    pub fn prop(&self, name: &str) -> Option<&Prop> {
        self.by_name.get(name).map(|i| &self.props[*i])
    }

    #[must_use]
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }
}

/// Where an index lookup is aimed: a form's primary value or a property.
#[derive(Debug, Clone, Copy)]
pub enum IndexTarget<'a> {
    Primary(&'a Form),
    Prop(&'a Prop),
}

impl IndexTarget<'_> {
    /// The name the index rows are filed under.
    #[must_use]
    pub fn index_name(&self) -> &str {
        match self {
            Self::Primary(form) => form.name(),
            Self::Prop(prop) => prop.full(),
        }
    }

    #[must_use]
    pub fn ty(&self) -> &Arc<Type> {
        match self {
            Self::Primary(form) => form.ty(),
            Self::Prop(prop) => prop.ty(),
        }
    }
}

// =============================================================================
// MODEL
// =============================================================================

/// The immutable form registry.
#[derive(Debug)]
pub struct Model {
    types: TypeLib,
    forms: BTreeMap<String, Form>,
    by_full: BTreeMap<String, (String, usize)>,
    refs: BTreeMap<String, Vec<String>>,
}

impl Model {
    /// Build a model from a single schema section.
    pub fn from_def(name: &str, def: &ModelDef) -> Result<Self, StoreError> {
        let mut builder = ModelBuilder::new();
        builder.add_defs(name, def)?;
        builder.build()
    }

    /// Build a model from a single JSON schema section.
    pub fn from_json_str(name: &str, text: &str) -> Result<Self, StoreError> {
        Self::from_def(name, &ModelDef::from_json_str(text)?)
    }

    /// The type registry.
    #[must_use]
    pub fn types(&self) -> &TypeLib {
        &self.types
    }

    #[must_use]
    pub fn form(&self, name: &str) -> Option<&Form> {
        self.forms.get(name)
    }

    /// Look up a form, failing with `NoSuchForm`.
    pub fn req_form(&self, name: &str) -> Result<&Form, StoreError> {
        self.form(name)
            .ok_or_else(|| StoreError::NoSuchForm(name.to_string()))
    }

    /// Iterate forms in name order.
    pub fn forms(&self) -> impl Iterator<Item = &Form> {
        self.forms.values()
    }

    /// Resolve `prop` on `form`: its type, read-only flag and default.
    pub fn resolve_prop(&self, form: &str, prop: &str) -> Result<&Prop, StoreError> {
        self.req_form(form)?
            .prop(prop)
            .ok_or_else(|| StoreError::NoSuchProp(full_prop_name(form, prop)))
    }

    /// Look up a property by its full dotted name.
    #[must_use]
    pub fn prop(&self, full: &str) -> Option<&Prop> {
        let (form, idx) = self.by_full.get(full)?;
        self.forms.get(form).map(|f| &f.props[*idx])
    }

    /// Resolve a query name: a form name targets primary values, a full
    /// property name targets that property.
    pub fn index_target(&self, name: &str) -> Result<IndexTarget<'_>, StoreError> {
        if let Some(form) = self.form(name) {
            return Ok(IndexTarget::Primary(form));
        }
        self.prop(name)
            .map(IndexTarget::Prop)
            .ok_or_else(|| StoreError::NoSuchProp(name.to_string()))
    }

    /// Every property whose values point at nodes of `form`.
    pub fn props_referencing(&self, form: &str) -> impl Iterator<Item = &Prop> {
        self.refs
            .get(form)
            .into_iter()
            .flatten()
            .filter_map(|full| self.prop(full))
    }
}

/// Accumulates schema sections and builds the model once.
#[derive(Debug, Default)]
pub struct ModelBuilder {
    types: TypeLib,
    forms: Vec<(String, FormDef)>,
}

impl ModelBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema section. Types are registered immediately, in
    /// order; forms are resolved in `build` so they may use types from any
    /// section.
    pub fn add_defs(&mut self, name: &str, def: &ModelDef) -> Result<&mut Self, StoreError> {
        for CtorDef(tname, base, opts, info) in &def.ctors {
            self.types
                .add_ctor(tname, base, opts, info.doc.clone())
                .map_err(|e| in_section(name, e))?;
        }
        for TypeDef(tname, spec, info) in &def.types {
            self.types
                .add_type(tname, spec, info.doc.clone())
                .map_err(|e| in_section(name, e))?;
        }
        for form in &def.forms {
            self.forms.push((name.to_string(), form.clone()));
        }
        Ok(self)
    }

    /// Resolve every form and freeze the registry.
    pub fn build(self) -> Result<Model, StoreError> {
        let Self {
            mut types,
            forms: defs,
        } = self;

        let time = Arc::clone(types.req(BaseKind::Time.name())?);
        let mut forms = BTreeMap::new();
        for (section, FormDef(fname, info, props)) in defs {
            if forms.contains_key(&fname) {
                return Err(StoreError::BadSchema(format!(
                    "{}: duplicate form {}",
                    section, fname
                )));
            }
            let ty = Arc::clone(types.req(&fname).map_err(|e| in_section(&section, e))?);
            types.add_prop_type(&fname, Arc::clone(&ty));
            types.add_prop_type(&full_prop_name(&fname, UNIV_CREATED), Arc::clone(&time));

            let mut form = Form {
                name: fname.clone(),
                ty,
                props: Vec::with_capacity(props.len() + 1),
                by_name: BTreeMap::new(),
                doc: info.doc,
            };
            form.push(Prop {
                name: UNIV_CREATED.to_string(),
                full: full_prop_name(&fname, UNIV_CREATED),
                form: fname.clone(),
                ty: Arc::clone(&time),
                ro: true,
                univ: true,
                defval: None,
                doc: Some("The time the node was created.".to_string()),
                pivot: None,
            })?;

            for PropDef(pname, spec, pinfo) in props {
                check_prop_name(&fname, &pname)?;
                let pty = types.resolve_spec(&spec).map_err(|e| in_section(&section, e))?;
                types.add_prop_type(&full_prop_name(&fname, &pname), Arc::clone(&pty));
                let defval = match &pinfo.defval {
                    Some(raw) => {
                        let valu = Valu::from_json(raw)?;
                        pty.norm(&types, &valu).map_err(|e| {
                            StoreError::BadSchema(format!(
                                "default for {} does not normalize: {}",
                                full_prop_name(&fname, &pname),
                                e
                            ))
                        })?;
                        Some(valu)
                    }
                    None => None,
                };
                form.push(Prop {
                    full: full_prop_name(&fname, &pname),
                    name: pname,
                    form: fname.clone(),
                    ty: pty,
                    ro: pinfo.ro,
                    univ: false,
                    defval,
                    doc: pinfo.doc,
                    pivot: None,
                })?;
            }
            forms.insert(fname, form);
        }

        let names: BTreeSet<String> = forms.keys().cloned().collect();
        let mut by_full = BTreeMap::new();
        let mut refs: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for form in forms.values_mut() {
            for (idx, prop) in form.props.iter_mut().enumerate() {
                if names.contains(prop.ty.name()) && prop.ty.base() != BaseKind::Ndef {
                    prop.pivot = Some(prop.ty.name().to_string());
                    refs.entry(prop.ty.name().to_string())
                        .or_default()
                        .push(prop.full.clone());
                }
                by_full.insert(prop.full.clone(), (form.name.clone(), idx));
            }
        }

        Ok(Model {
            types,
            forms,
            by_full,
            refs,
        })
    }
}

impl Form {
    fn push(&mut self, prop: Prop) -> Result<(), StoreError> {
        if self.by_name.contains_key(&prop.name) {
            return Err(StoreError::BadSchema(format!("duplicate prop {}", prop.full)));
        }
        self.by_name.insert(prop.name.clone(), self.props.len());
        self.props.push(prop);
        Ok(())
    }
}

fn check_prop_name(form: &str, name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.starts_with('.') || name.contains(['\0', ':']) {
        return Err(StoreError::BadSchema(format!(
            "invalid prop name {:?} on form {}",
            name, form
        )));
    }
    Ok(())
}

fn in_section(section: &str, err: StoreError) -> StoreError {
    match err {
        StoreError::BadSchema(m) => StoreError::BadSchema(format!("{}: {}", section, m)),
        other => other,
    }
}

// =============================================================================
// TESTS
// =============================================================================
