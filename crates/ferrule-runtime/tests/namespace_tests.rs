//! Namespace integration tests
//!
//! Declaration surface first, then live calls against libc and libm:
//! - typedefs, callback types, struct types, tagged enums
//! - freeze semantics
//! - attached functions, variadics, globals, and callback-typed
//!   parameters exercised against real symbols

use ferrule_runtime::{EnumItem, FfiError, Namespace, NativeType, ScalarKind};
use pretty_assertions::assert_eq;

// ============================================================================
// Declaration Surface
// ============================================================================

#[test]
fn test_typedef_resolves_through_alias() {
    let mut ns = Namespace::new();
    ns.typedef("uint32", "GLuint").unwrap();
    let ty = ns.resolve_type("GLuint").unwrap();
    let kind = ty.scalar().unwrap();
    assert!(kind.is_integer());
    assert_eq!(kind.size(), 4);
}

#[test]
fn test_typedef_of_unknown_type_fails() {
    let mut ns = Namespace::new();
    assert!(matches!(
        ns.typedef("no_such_type", "alias"),
        Err(FfiError::UnknownType { .. })
    ));
}

#[test]
fn test_named_callback_becomes_a_type() {
    let mut ns = Namespace::new();
    let ty = ns
        .callback(Some("cmp_cb"), &["pointer", "pointer"], "int")
        .unwrap();
    assert!(matches!(ty, NativeType::Function(_)));
    assert!(matches!(
        ns.resolve_type("cmp_cb").unwrap(),
        NativeType::Function(_)
    ));
}

#[test]
fn test_callback_rejects_void_parameter() {
    let mut ns = Namespace::new();
    let err = ns.callback(None, &["void"], "int").unwrap_err();
    assert!(err
        .to_string()
        .contains("void is not allowed as a parameter type"));
}

#[test]
fn test_callback_rejects_string_return() {
    let mut ns = Namespace::new();
    let err = ns.callback(None, &["int"], "string").unwrap_err();
    assert!(err
        .to_string()
        .contains("string is not allowed as a callback return type"));
}

#[test]
fn test_callback_rejects_varargs_parameter() {
    let mut ns = Namespace::new();
    assert!(ns.callback(None, &["int", "varargs"], "void").is_err());
}

#[test]
fn test_struct_type_is_pointer_sized() {
    let mut ns = Namespace::new();
    let mut builder = ferrule_runtime::StructLayoutBuilder::new();
    builder.add("x", ScalarKind::Int.into(), None).unwrap();
    let layout = builder.build().unwrap();

    ns.struct_type("point_t", &layout).unwrap();
    let ty = ns.resolve_type("point_t").unwrap();
    assert_eq!(ty.scalar(), Some(ScalarKind::Pointer));
    assert_eq!(ty.size(), std::mem::size_of::<usize>());
}

#[test]
fn test_tagged_enum_joins_set_and_registry() {
    let mut ns = Namespace::new();
    ns.enum_def(
        Some("color_t"),
        &[
            EnumItem::from("red"),
            EnumItem::from("green"),
            EnumItem::from("blue"),
        ],
    )
    .unwrap();

    assert!(ns.enums().find("color_t").is_some());
    assert_eq!(ns.enums().symbol_value("green"), Some(1));
    assert!(matches!(
        ns.resolve_type("color_t").unwrap(),
        NativeType::Mapped(_)
    ));
}

#[test]
fn test_frozen_namespace_rejects_declarations() {
    let mut ns = Namespace::new();
    ns.freeze();
    assert!(ns.is_frozen());
    let err = ns.typedef("int", "my_int").unwrap_err();
    assert_eq!(err.to_string(), "can't modify frozen namespace");
}

#[test]
fn test_variable_without_library_is_a_configuration_error() {
    let mut ns = Namespace::new();
    let err = ns.attach_variable("errno", None, "int").unwrap_err();
    assert!(matches!(err, FfiError::Configuration(_)));
    assert!(err.to_string().contains("no library specified"));
}

// ============================================================================
// Live Calls
// ============================================================================

#[cfg(target_os = "linux")]
mod live {
    use super::*;
    use ferrule_runtime::{PointerHandle, Value};
    use pretty_assertions::assert_eq;
    use std::os::raw::{c_int, c_void};
    use std::sync::Arc;

    fn libc_ns() -> Namespace {
        let mut ns = Namespace::new();
        ns.use_current_process().unwrap();
        ns
    }

    #[test]
    fn test_float_functions_from_libm() {
        let mut ns = Namespace::new();
        ns.library("libm.so.6").unwrap();
        ns.attach("pow", &["double", "double"], "double").unwrap();
        ns.attach("fabs", &["double"], "double").unwrap();

        assert_eq!(
            ns.call("pow", &[Value::Float(2.0), Value::Float(10.0)])
                .unwrap(),
            Value::Float(1024.0)
        );
        assert_eq!(
            ns.call("fabs", &[Value::Float(-3.5)]).unwrap(),
            Value::Float(3.5)
        );
    }

    #[test]
    fn test_string_argument_and_integer_return() {
        let mut ns = libc_ns();
        ns.attach("strlen", &["string"], "ulong").unwrap();
        assert_eq!(
            ns.call("strlen", &[Value::string("ferrule")]).unwrap(),
            Value::UInt(7)
        );
    }

    #[test]
    fn test_pointer_lifecycle_through_strdup_and_free() {
        let mut ns = libc_ns();
        ns.attach("strdup", &["string"], "pointer").unwrap();
        ns.attach("free", &["pointer"], "void").unwrap();

        let dup = ns.call("strdup", &[Value::string("copy me")]).unwrap();
        let handle = match &dup {
            Value::Ptr(p) => Arc::clone(p),
            other => panic!("expected pointer, got {:?}", other),
        };
        assert!(!handle.is_null());
        assert_eq!(handle.read_string(0).unwrap(), "copy me");

        assert_eq!(ns.call("free", &[dup]).unwrap(), Value::Null);
    }

    #[test]
    fn test_memset_fills_allocated_memory() {
        let mut ns = libc_ns();
        ns.attach("memset", &["pointer", "int", "ulong"], "pointer")
            .unwrap();

        let buf = Arc::new(PointerHandle::alloc(8).unwrap());
        let filled = ns
            .call(
                "memset",
                &[
                    Value::Ptr(Arc::clone(&buf)),
                    Value::Int(0x41),
                    Value::UInt(8),
                ],
            )
            .unwrap();

        match filled {
            Value::Ptr(p) => assert_eq!(p.address(), buf.address()),
            other => panic!("expected pointer, got {:?}", other),
        }
        assert_eq!(buf.read_bytes(0, 8).unwrap(), vec![0x41; 8]);
    }

    extern "C" fn compare_ints(a: *const c_void, b: *const c_void) -> c_int {
        unsafe {
            let a = *(a as *const i32);
            let b = *(b as *const i32);
            (a > b) as c_int - ((a < b) as c_int)
        }
    }

    #[test]
    fn test_callback_parameter_drives_qsort() {
        let mut ns = libc_ns();
        ns.callback(Some("cmp_cb"), &["pointer", "pointer"], "int")
            .unwrap();
        ns.attach("qsort", &["pointer", "ulong", "ulong", "cmp_cb"], "void")
            .unwrap();

        let arr = Arc::new(PointerHandle::alloc(4 * 4).unwrap());
        for (i, n) in [40, 10, 30, 20].iter().enumerate() {
            arr.write(ScalarKind::Int, i * 4, &Value::Int(*n)).unwrap();
        }

        let cmp = unsafe { PointerHandle::from_address(compare_ints as usize) };
        ns.call(
            "qsort",
            &[
                Value::Ptr(Arc::clone(&arr)),
                Value::UInt(4),
                Value::UInt(4),
                Value::Ptr(Arc::new(cmp)),
            ],
        )
        .unwrap();

        let sorted: Vec<Value> = (0..4)
            .map(|i| arr.read(ScalarKind::Int, i * 4).unwrap())
            .collect();
        assert_eq!(
            sorted,
            vec![
                Value::Int(10),
                Value::Int(20),
                Value::Int(30),
                Value::Int(40)
            ]
        );
    }

    #[test]
    fn test_variadic_formatting() {
        let mut ns = libc_ns();
        ns.attach(
            "snprintf",
            &["pointer", "ulong", "string", "varargs"],
            "int",
        )
        .unwrap();

        let buf = Arc::new(PointerHandle::alloc(64).unwrap());
        let written = ns
            .call_variadic(
                "snprintf",
                &["string", "uint"],
                &[
                    Value::Ptr(Arc::clone(&buf)),
                    Value::UInt(64),
                    Value::string("%s:%x"),
                    Value::string("id"),
                    Value::UInt(255),
                ],
            )
            .unwrap();

        assert_eq!(written, Value::Int(5));
        assert_eq!(buf.read_string(0).unwrap(), "id:ff");
    }

    #[test]
    fn test_enum_mapped_through_a_call() {
        let mut ns = libc_ns();
        ns.enum_def_with(
            "int",
            Some("delta_t"),
            &[
                EnumItem::from("fall"),
                EnumItem::from(-5),
                EnumItem::from("rise"),
                EnumItem::from(5),
            ],
        )
        .unwrap();
        ns.attach("abs", &["delta_t"], "delta_t").unwrap();

        assert_eq!(
            ns.call("abs", &[Value::symbol("fall")]).unwrap(),
            Value::symbol("rise")
        );
    }

    #[test]
    fn test_global_variable_reads_as_pointer() {
        let mut ns = libc_ns();
        ns.attach_variable("stdout", None, "pointer").unwrap();
        let v = ns.variable("stdout").unwrap();
        match v.read().unwrap() {
            Value::Ptr(p) => assert!(!p.is_null()),
            other => panic!("expected pointer, got {:?}", other),
        }
    }
}
