//! # Property-Based Tests
//!
//! Encoding invariants checked with proptest: index bytes are
//! deterministic, int and time encodings preserve order, and adding a node
//! is idempotent.

mod common;

use proptest::prelude::*;
use tufo_core::storage::keys;
use tufo_core::typelib::int_indx;
use tufo_core::{TypeLib, Valu};

fn indx(lib: &TypeLib, name: &str, raw: Valu) -> Vec<u8> {
    let ty = lib.req(name).expect("type");
    let norm = ty.norm(lib, &raw).expect("norm");
    ty.indx(lib, &norm.valu).expect("indx")
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// The same raw value always yields the same index bytes.
    #[test]
    fn index_bytes_are_deterministic(v in any::<i64>(), s in "[ -~]{0,24}") {
        let lib = TypeLib::new();
        prop_assert_eq!(indx(&lib, "int", Valu::Int(v)), indx(&lib, "int", Valu::Int(v)));
        prop_assert_eq!(
            indx(&lib, "str", Valu::from(s.as_str())),
            indx(&lib, "str", Valu::from(s.as_str()))
        );
        let guid = Valu::List(vec![Valu::from(s.as_str()), Valu::Int(v)]);
        prop_assert_eq!(indx(&lib, "guid", guid.clone()), indx(&lib, "guid", guid));
    }

    /// Integer order matches byte order of the index encoding.
    #[test]
    fn int_order_is_preserved(a in any::<i64>(), b in any::<i64>()) {
        let lib = TypeLib::new();
        let (ia, ib) = (indx(&lib, "int", Valu::Int(a)), indx(&lib, "int", Valu::Int(b)));
        prop_assert_eq!(a.cmp(&b), ia.cmp(&ib));
        prop_assert_eq!(ia, int_indx(a).to_vec());
    }

    /// Time order matches byte order, including dates given as strings.
    #[test]
    fn time_order_is_preserved(
        y1 in 1900i32..2200, m1 in 1u32..13, d1 in 1u32..29,
        y2 in 1900i32..2200, m2 in 1u32..13, d2 in 1u32..29,
    ) {
        let lib = TypeLib::new();
        let t1 = format!("{:04}/{:02}/{:02}", y1, m1, d1);
        let t2 = format!("{:04}-{:02}-{:02}", y2, m2, d2);
        let ty = lib.req("time").expect("time");
        let n1 = ty.norm(&lib, &Valu::from(t1.as_str())).expect("t1").valu;
        let n2 = ty.norm(&lib, &Valu::from(t2.as_str())).expect("t2").valu;

        prop_assert_eq!((y1, m1, d1).cmp(&(y2, m2, d2)), n1.cmp(&n2));
        let (i1, i2) = (ty.indx(&lib, &n1).expect("i1"), ty.indx(&lib, &n2).expect("i2"));
        prop_assert_eq!(n1.cmp(&n2), i1.cmp(&i2));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Adding a node twice returns the same node and one primary index row.
    #[test]
    fn add_node_is_idempotent(name in "[a-z]{1,12}", num in any::<i64>()) {
        let store = common::mem_store();
        let mut snap = store.snap("root");

        let props = [("num", Valu::Int(num))];
        let first = snap.add_node("teststr", name.as_str(), &props).expect("first");
        let second = snap.add_node("teststr", name.as_str(), &props).expect("second");

        prop_assert_eq!(first.buid(), second.buid());
        prop_assert_eq!(first.props(), second.props());

        let primary = store
            .layers()
            .scan_prefix(&keys::prop_index_prefix("teststr"))
            .expect("primary index");
        prop_assert_eq!(primary.len(), 1);
        let num_rows = store
            .layers()
            .scan_prefix(&keys::prop_index_prefix("teststr:num"))
            .expect("num index");
        prop_assert_eq!(num_rows.len(), 1);
    }
}
