use pretty_assertions::assert_eq;
use pyo3::prelude::*;
use pysv::{
    BridgeError, Decoded, ForeignObject, NativeType, NativeValue, ResultShape, class_defs, ffi,
    registry::{self, DESTROY_METHOD},
};

const SOME_CLASS: &std::ffi::CStr = c"
class SomeClass:
    def __init__(self):
        self.value = 1

    def plus(self, num):
        self.value += num
        return self.value

    def add_sub(self, a, b):
        return a + b, a - b

__result = SomeClass()
";

fn refcount(object: &Bound<'_, PyAny>) -> isize {
    // SAFETY: `object` is a live reference and the thread is attached.
    unsafe { pyo3::ffi::Py_REFCNT(object.as_ptr()) }
}

fn plus(handle: pysv::Handle, num: i32) -> pysv::BridgeResult<Decoded> {
    pysv::call(|frame| {
        frame.bind("num", &NativeValue::Int(num))?;
        frame.dispatch(handle, "plus", &["num"])?;
        frame.decode(&ResultShape::Scalar(NativeType::Int))
    })
}

#[test]
fn methods_mutate_the_registered_instance() {
    let handle = pysv::call(|frame| frame.construct(SOME_CLASS, "SomeClass")).unwrap();
    assert!(registry::contains(handle));

    assert_eq!(plus(handle, 41).unwrap(), Decoded::Value(NativeValue::Int(42)));
    assert_eq!(plus(handle, 1).unwrap(), Decoded::Value(NativeValue::Int(43)));

    let values = pysv::call(|frame| {
        frame.bind("a", &NativeValue::Int(10))?;
        frame.bind("b", &NativeValue::Int(3))?;
        frame.dispatch(handle, "add_sub", &["a", "b"])?;
        frame.decode(&ResultShape::Multi(vec![NativeType::Int, NativeType::Int]))
    })
    .unwrap();
    assert_eq!(values.into_values().unwrap(), [NativeValue::Int(13), NativeValue::Int(7)]);

    pysv::call(|frame| frame.dispatch_destroy(handle)).unwrap();
}

/// A class defined by one call can be instantiated by a later call that
/// does not redefine it.
#[test]
fn class_definitions_outlive_their_call() {
    let first = pysv::call(|frame| {
        frame.construct(
            c"class Accumulator:\n    def __init__(self):\n        self.total = 0\n__result = Accumulator()\n",
            "Accumulator",
        )
    })
    .unwrap();
    pysv::call(|frame| {
        assert!(class_defs::lookup(frame.py(), "Accumulator").is_some());
        Ok(())
    })
    .unwrap();

    let second = pysv::call(|frame| frame.construct(c"__result = Accumulator()\n", "Accumulator")).unwrap();
    assert_ne!(first, second);

    let same_class = pysv::call(|frame| {
        let a = registry::lookup(frame.py(), first)?.get_type();
        let b = registry::lookup(frame.py(), second)?.get_type();
        Ok(a.as_ptr() == b.as_ptr())
    })
    .unwrap();
    assert!(same_class);

    for handle in [first, second] {
        pysv::call(|frame| frame.dispatch_destroy(handle)).unwrap();
    }
}

#[test]
fn undefined_class_fails_to_construct() {
    let err = pysv::call(|frame| frame.construct(c"__result = NeverDefined()\n", "NeverDefined")).unwrap_err();
    assert!(matches!(err, BridgeError::Evaluation(_)), "{err}");
    let registered = pysv::call(|frame| Ok(class_defs::lookup(frame.py(), "NeverDefined").is_some())).unwrap();
    assert!(!registered);
}

#[test]
fn destroy_is_single_shot() {
    let handle = pysv::call(|frame| frame.construct(SOME_CLASS, "SomeClass")).unwrap();
    pysv::call(|frame| frame.dispatch_destroy(handle)).unwrap();
    assert!(!registry::contains(handle));

    let err = pysv::call(|frame| frame.dispatch_destroy(handle)).unwrap_err();
    assert!(matches!(err, BridgeError::UnknownHandle { handle: h } if h == handle));
}

/// The path generated destroy entry points take: the second destroy is logged
/// and returns instead of aborting the process.
#[test]
fn repeated_destroy_at_the_entry_point_is_not_fatal() {
    let handle = pysv::call(|frame| frame.construct(SOME_CLASS, "SomeClass")).unwrap();
    for _ in 0..2 {
        ffi::or_abort(pysv::call(|frame| frame.dispatch_destroy(handle)));
    }
    assert!(!registry::contains(handle));

    let stale_constructor = ffi::or_abort_with(
        pysv::call(|frame| frame.dispatch_destroy(handle)).map(|()| handle.as_ptr()),
        std::ptr::null_mut(),
    );
    assert!(stale_constructor.is_null());
}

/// `destroy` dispatched like any other method is logged on a stale handle and leaves `None`.
#[test]
fn repeated_destroy_through_dispatch_leaves_no_result() {
    let handle = pysv::call(|frame| frame.construct(SOME_CLASS, "SomeClass")).unwrap();
    for _ in 0..2 {
        let result_is_none = pysv::call(|frame| {
            frame.dispatch(handle, DESTROY_METHOD, &[])?;
            Ok(frame.scope().result()?.is_none())
        })
        .unwrap();
        assert!(result_is_none);
    }
    assert!(!registry::contains(handle));
}

/// A call through a destroyed handle is logged and yields `None`, not a crash.
#[test]
fn call_through_stale_handle_has_no_result() {
    let handle = pysv::call(|frame| frame.construct(SOME_CLASS, "SomeClass")).unwrap();
    pysv::call(|frame| frame.dispatch_destroy(handle)).unwrap();

    let result_is_none = pysv::call(|frame| {
        frame.bind("num", &NativeValue::Int(1))?;
        frame.dispatch(handle, "plus", &["num"])?;
        Ok(frame.scope().result()?.is_none())
    })
    .unwrap();
    assert!(result_is_none);

    let err = pysv::call(|frame| {
        frame.dispatch(handle, "plus", &[])?;
        frame.decode(&ResultShape::Scalar(NativeType::Int))
    })
    .unwrap_err();
    assert!(matches!(err, BridgeError::TypeMismatch { .. }), "{err}");
}

/// `destroy` is bookkeeping only; a Python method of that name never runs.
#[test]
fn user_destroy_method_is_not_invoked() {
    let (handle, log) = pysv::call(|frame| {
        let handle = frame.construct(
            c"class Tracked:\n    def __init__(self):\n        self.log = []\n    def destroy(self):\n        self.log.append('destroyed')\n__result = Tracked()\n",
            "Tracked",
        )?;
        let log = registry::lookup(frame.py(), handle)?.getattr("log")?.unbind();
        Ok((handle, log))
    })
    .unwrap();

    pysv::call(|frame| frame.dispatch_destroy(handle)).unwrap();

    let entries = pysv::call(|frame| Ok(log.bind(frame.py()).len()?)).unwrap();
    assert_eq!(entries, 0);
}

#[test]
fn registry_holds_exactly_one_reference() {
    pysv::call(|frame| {
        let py = frame.py();
        frame.eval(c"__result = object()\n")?;
        let object = frame.scope().result()?;
        let before = refcount(&object);

        let handle = registry::capture(&object)?;
        assert_eq!(refcount(&object), before + 1);

        let looked_up = registry::lookup(py, handle)?;
        assert_eq!(looked_up.as_ptr(), object.as_ptr());
        drop(looked_up);

        registry::release(py, handle)?;
        assert_eq!(refcount(&object), before);
        assert!(matches!(
            registry::release(py, handle),
            Err(BridgeError::UnknownHandle { .. })
        ));
        Ok(())
    })
    .unwrap();
}

#[test]
fn handles_are_never_reused() {
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let handle = pysv::call(|frame| frame.construct(SOME_CLASS, "SomeClass")).unwrap();
            pysv::call(|frame| frame.dispatch_destroy(handle)).unwrap();
            handle
        })
        .collect();
    for (i, a) in handles.iter().enumerate() {
        assert!(handles[i + 1..].iter().all(|b| a != b));
    }
}

/// A handle argument reaches Python as the object it names.
#[test]
fn handle_arguments_bind_their_object() {
    let handle = pysv::call(|frame| frame.construct(SOME_CLASS, "SomeClass")).unwrap();
    let value = pysv::call(|frame| {
        frame.bind("obj", &NativeValue::Handle(handle))?;
        frame.eval(c"def peek(obj):\n    return obj.value\n\n__result = peek(__obj)\n")?;
        frame.decode(&ResultShape::Scalar(NativeType::Int))
    })
    .unwrap();
    assert_eq!(value.into_value(), Some(NativeValue::Int(1)));
    pysv::call(|frame| frame.dispatch_destroy(handle)).unwrap();

    let stale_is_none = pysv::call(|frame| {
        frame.bind("obj", &NativeValue::Handle(handle))?;
        frame.eval(c"__result = __obj is None\n")?;
        frame.decode(&ResultShape::Scalar(NativeType::Bit))
    })
    .unwrap();
    assert_eq!(stale_is_none.into_value(), Some(NativeValue::Bit(true)));
}

/// A method may hand back another object; the result is captured under a new handle.
#[test]
fn returned_objects_are_captured() {
    let parent = pysv::call(|frame| {
        frame.construct(
            c"class Node:\n    def __init__(self, depth=0):\n        self.depth = depth\n    def spawn(self):\n        return type(self)(self.depth + 1)\n__result = Node()\n",
            "Node",
        )
    })
    .unwrap();

    let child = pysv::call(|frame| {
        frame.dispatch(parent, "spawn", &[])?;
        frame.decode(&ResultShape::Scalar(NativeType::Handle))
    })
    .unwrap();
    let Some(NativeValue::Handle(child)) = child.into_value() else {
        panic!("expected a handle");
    };
    assert_ne!(child, parent);

    let depth = pysv::call(|frame| Ok(registry::lookup(frame.py(), child)?.getattr("depth")?.extract::<i32>()?)).unwrap();
    assert_eq!(depth, 1);

    for handle in [parent, child] {
        pysv::call(|frame| frame.dispatch_destroy(handle)).unwrap();
    }
}

#[test]
fn foreign_object_destroys_on_drop() {
    let object = ForeignObject::construct(SOME_CLASS, "SomeClass").unwrap();
    let handle = object.handle();
    let result = object
        .call("plus", &[NativeValue::Int(9)], &ResultShape::Scalar(NativeType::Int))
        .unwrap();
    assert_eq!(result, Decoded::Value(NativeValue::Int(10)));
    assert!(registry::contains(handle));

    drop(object);
    assert!(!registry::contains(handle));
}

#[test]
fn released_foreign_object_leaves_its_handle_alive() {
    let object = ForeignObject::construct(SOME_CLASS, "SomeClass").unwrap();
    let handle = object.into_handle();
    assert!(registry::contains(handle));

    ForeignObject::from_handle(handle).close().unwrap();
    assert!(!registry::contains(handle));
}

#[test]
fn closing_a_stale_foreign_object_reports_the_handle() {
    let handle = pysv::call(|frame| frame.construct(SOME_CLASS, "SomeClass")).unwrap();
    pysv::call(|frame| frame.dispatch_destroy(handle)).unwrap();

    let err = ForeignObject::from_handle(handle).close().unwrap_err();
    assert!(matches!(err, BridgeError::UnknownHandle { .. }));
}
