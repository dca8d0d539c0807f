//! Declarative request validation.
//!
//! A [`Validator`] owns an ordered list of [`FieldSpec`]s and checks every
//! field of a raw JSON object against them, collecting all violations
//! instead of stopping at the first. [`RequestValidator`] is the field set
//! for code generation requests and produces a typed [`ValidatedRequest`].

pub mod field;
pub mod request;
pub mod rules;
pub mod validator;

pub use field::{FieldSpec, FieldType, FieldValue};
pub use request::{Language, RequestValidator, ValidatedRequest};
pub use validator::{ValidatedFields, Validator};
