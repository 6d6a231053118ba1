//! The type registry: canonical property types, their aliases, and the default filter
//! and validation each one installs on a declared property.
//!
//! The registry is a fixed table built at compile time. Scalar kinds (`String`,
//! `Number`, `Boolean`) and the `Array` kind ship default addons; `Date`, `Mixed` and
//! `ObjectId` carry none.

use bson::Bson;

use crate::{
    error::ValidationError,
    schema::Decl,
    value::{is_truthy, to_number, to_text},
};

/// The closed set of property kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    String,
    Number,
    Boolean,
    Date,
    Mixed,
    ObjectId,
    Array,
}

/// Default coercion applied to a present value.
pub type TypeFilter = fn(&Bson) -> Bson;

/// Default check applied to a possibly absent value.
pub type TypeValidator = fn(Option<&Bson>) -> Option<ValidationError>;

/// Registry entry for one [`TypeKind`].
#[derive(Debug)]
pub struct TypeDescriptor {
    pub kind: TypeKind,
    /// Canonical name, e.g. `"Number"`.
    pub name: &'static str,
    /// Alternative spellings accepted in declarations.
    pub aliases: &'static [&'static str],
    pub filter: Option<TypeFilter>,
    pub validate: Option<TypeValidator>,
}

impl TypeDescriptor {
    /// Whether `token` names this type, either canonically or through an alias.
    pub fn matches(&self, token: &str) -> bool {
        self.name == token || self.aliases.contains(&token)
    }
}

fn filter_string(value: &Bson) -> Bson {
    Bson::String(to_text(value))
}

fn filter_number(value: &Bson) -> Bson {
    to_number(value)
}

fn filter_boolean(value: &Bson) -> Bson {
    Bson::Boolean(is_truthy(value))
}

fn validate_number(value: Option<&Bson>) -> Option<ValidationError> {
    let finite = match value? {
        Bson::Int32(_) | Bson::Int64(_) => true,
        Bson::Double(n) => n.is_finite(),
        _ => false,
    };

    (!finite).then(|| ValidationError::new("{field} is not a valid number."))
}

fn validate_array(value: Option<&Bson>) -> Option<ValidationError> {
    match value? {
        Bson::Array(_) => None,
        _ => Some(ValidationError::new("{field} is not a valid array.")),
    }
}

static TYPES: [TypeDescriptor; 7] = [
    TypeDescriptor {
        kind: TypeKind::String,
        name: "String",
        aliases: &["string"],
        filter: Some(filter_string),
        validate: None,
    },
    TypeDescriptor {
        kind: TypeKind::Number,
        name: "Number",
        aliases: &["number", "num"],
        filter: Some(filter_number),
        validate: Some(validate_number),
    },
    TypeDescriptor {
        kind: TypeKind::Boolean,
        name: "Boolean",
        aliases: &["boolean", "bool"],
        filter: Some(filter_boolean),
        validate: None,
    },
    TypeDescriptor {
        kind: TypeKind::Date,
        name: "Date",
        aliases: &["date"],
        filter: None,
        validate: None,
    },
    TypeDescriptor {
        kind: TypeKind::Mixed,
        name: "Mixed",
        aliases: &["mixed"],
        filter: None,
        validate: None,
    },
    TypeDescriptor {
        kind: TypeKind::ObjectId,
        name: "ObjectId",
        aliases: &["object_id", "id"],
        filter: None,
        validate: None,
    },
    TypeDescriptor {
        kind: TypeKind::Array,
        name: "Array",
        aliases: &[],
        filter: None,
        validate: Some(validate_array),
    },
];

/// A reference to a type inside a property declaration.
#[derive(Debug, Clone)]
pub enum TypeRef {
    /// A kind given directly.
    Kind(TypeKind),
    /// A canonical name or alias, resolved through the registry.
    Name(String),
    /// An array literal wrapping the element declaration. Exactly one element is
    /// expected; anything else is rejected when the property is compiled.
    Array(Vec<Decl>),
}

impl From<TypeKind> for TypeRef {
    fn from(kind: TypeKind) -> Self {
        TypeRef::Kind(kind)
    }
}

impl From<&str> for TypeRef {
    fn from(name: &str) -> Self {
        TypeRef::Name(name.to_string())
    }
}

/// Every registered type, in lookup order.
pub fn all() -> &'static [TypeDescriptor] {
    &TYPES
}

/// Returns the descriptor for a kind.
pub fn descriptor(kind: TypeKind) -> &'static TypeDescriptor {
    match kind {
        TypeKind::String => &TYPES[0],
        TypeKind::Number => &TYPES[1],
        TypeKind::Boolean => &TYPES[2],
        TypeKind::Date => &TYPES[3],
        TypeKind::Mixed => &TYPES[4],
        TypeKind::ObjectId => &TYPES[5],
        TypeKind::Array => &TYPES[6],
    }
}

/// Resolves a type reference. An array literal always resolves to the array kind,
/// whatever its element is. Unknown names resolve to `None`.
pub fn get(reference: &TypeRef) -> Option<&'static TypeDescriptor> {
    match reference {
        TypeRef::Kind(kind) => Some(descriptor(*kind)),
        TypeRef::Name(name) => TYPES.iter().find(|t| t.matches(name)),
        TypeRef::Array(_) => Some(descriptor(TypeKind::Array)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_names_and_aliases() {
        assert_eq!(get(&"num".into()).map(|t| t.kind), Some(TypeKind::Number));
        assert_eq!(get(&"ObjectId".into()).map(|t| t.kind), Some(TypeKind::ObjectId));
        assert_eq!(get(&"id".into()).map(|t| t.kind), Some(TypeKind::ObjectId));
        assert_eq!(get(&"Array".into()).map(|t| t.kind), Some(TypeKind::Array));
        assert!(get(&"decimal".into()).is_none());
    }

    #[test]
    fn array_literal_is_always_array() {
        let reference = TypeRef::Array(vec![Decl::from(TypeKind::Number)]);
        assert_eq!(get(&reference).map(|t| t.kind), Some(TypeKind::Array));

        let empty = TypeRef::Array(vec![]);
        assert_eq!(get(&empty).map(|t| t.kind), Some(TypeKind::Array));
    }

    #[test]
    fn only_scalars_and_arrays_have_defaults() {
        for kind in [TypeKind::Date, TypeKind::Mixed, TypeKind::ObjectId] {
            let t = descriptor(kind);
            assert!(t.filter.is_none() && t.validate.is_none());
        }
        assert!(descriptor(TypeKind::Array).validate.is_some());
    }

    #[test]
    fn number_validation() {
        let validate = descriptor(TypeKind::Number).validate.expect("number has a validator");
        assert!(validate(None).is_none());
        assert!(validate(Some(&Bson::Int32(4))).is_none());
        assert!(validate(Some(&Bson::Double(f64::NAN))).is_some());
        assert!(validate(Some(&Bson::String("4".into()))).is_some());
    }
}
