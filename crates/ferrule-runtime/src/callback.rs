//! Callback signatures
//!
//! A callback type describes a native function pointer well enough to pass
//! one around and to store it in struct fields. Only the shape is handled
//! here; building dispatch stubs for managed code is not.

use crate::error::{FfiError, FfiResult};
use crate::types::{Convention, NativeType, ScalarKind};

/// Parameter and result shape of a native function pointer
#[derive(Debug)]
pub struct CallbackSignature {
    params: Vec<NativeType>,
    result: NativeType,
    convention: Convention,
}

impl CallbackSignature {
    pub fn new(
        params: Vec<NativeType>,
        result: NativeType,
        convention: Convention,
    ) -> FfiResult<Self> {
        for param in &params {
            match param.scalar() {
                Some(ScalarKind::Varargs) => {
                    return Err(FfiError::InvalidDeclaration(
                        "callbacks cannot accept variadic parameters".to_string(),
                    ));
                }
                Some(ScalarKind::Void) => {
                    return Err(FfiError::InvalidDeclaration(
                        "void is not allowed as a parameter type".to_string(),
                    ));
                }
                _ => {}
            }
        }
        if matches!(result.scalar(), Some(ScalarKind::String)) {
            return Err(FfiError::InvalidDeclaration(
                "string is not allowed as a callback return type".to_string(),
            ));
        }
        Ok(Self {
            params,
            result,
            convention,
        })
    }

    pub fn params(&self) -> &[NativeType] {
        &self.params
    }

    pub fn result(&self) -> &NativeType {
        &self.result
    }

    pub fn convention(&self) -> Convention {
        self.convention
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_signature() {
        let sig = CallbackSignature::new(
            vec![ScalarKind::Int.into(), ScalarKind::Pointer.into()],
            ScalarKind::Int.into(),
            Convention::Default,
        )
        .unwrap();
        assert_eq!(sig.param_count(), 2);
        assert_eq!(sig.result(), &NativeType::Scalar(ScalarKind::Int));
    }

    #[test]
    fn test_variadic_parameter_rejected() {
        let err = CallbackSignature::new(
            vec![ScalarKind::Varargs.into()],
            ScalarKind::Void.into(),
            Convention::Default,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid declaration: callbacks cannot accept variadic parameters"
        );
    }

    #[test]
    fn test_void_parameter_rejected() {
        let err = CallbackSignature::new(
            vec![ScalarKind::Void.into()],
            ScalarKind::Void.into(),
            Convention::Default,
        )
        .unwrap_err();
        assert!(matches!(err, FfiError::InvalidDeclaration(_)));
    }

    #[test]
    fn test_string_return_rejected() {
        let err = CallbackSignature::new(
            vec![ScalarKind::Int.into()],
            ScalarKind::String.into(),
            Convention::Default,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid declaration: string is not allowed as a callback return type"
        );
    }

    #[test]
    fn test_void_return_allowed() {
        let sig = CallbackSignature::new(
            vec![ScalarKind::Double.into()],
            ScalarKind::Void.into(),
            Convention::Default,
        )
        .unwrap();
        assert!(sig.result().is_void());
    }
}
