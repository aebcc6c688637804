//! Property-based checks over the parameter algebra
//!
//! Targets the structural invariants: literal flags, resolve idempotence,
//! tuple collapse, keyword decay.

use proptest::prelude::*;

use stencil::{
    Context, Data, Expression, Keyword, Operator, Parameter, Symbol, Tuple, VarStack,
};

fn arb_scalar() -> impl Strategy<Value = Data> {
    prop_oneof![
        any::<bool>().prop_map(Data::Bool),
        any::<i64>().prop_map(Data::Int),
        any::<f64>().prop_filter("finite", |d| d.is_finite()).prop_map(Data::Double),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Data::string),
        Just(Data::Void),
    ]
}

proptest! {
    /// isLiteral implies resolved, invariant and not errored
    #[test]
    fn literal_implies_resolved_invariant_unerrored(data in arb_scalar()) {
        let parameter = Parameter::value(data);
        if parameter.is_literal() {
            prop_assert!(parameter.resolved());
            prop_assert!(parameter.invariant());
            prop_assert!(!parameter.errored());
        }
    }

    /// resolve is structurally idempotent
    #[test]
    fn resolve_is_idempotent(a in any::<i32>(), b in any::<i32>(), bound in any::<bool>()) {
        let mut context = Context::new();
        if bound {
            context
                .register_json(stencil::DEFAULT_SCOPE, serde_json::json!({"x": a}))
                .unwrap();
        }
        let mut stack = VarStack::new(&mut context);

        let expression = Expression::infix(
            Parameter::variable(stencil::Variable::named("x")),
            Operator::Plus,
            Parameter::value(Data::Int(i64::from(b))),
        )
        .unwrap();
        let parameter = Parameter::expression(expression);

        let once = parameter.resolve(&mut stack);
        let twice = once.clone().resolve(&mut stack);
        prop_assert_eq!(once, twice);
    }

    /// Any chain of single-member grouping tuples reduces to the member
    #[test]
    fn tuple_collapse_reduces_nesting(data in arb_scalar(), depth in 1usize..6) {
        let member = Parameter::value(data);
        let mut tuple = Tuple::new([member.clone()]);
        for _ in 1..depth {
            tuple = Tuple::new([Parameter::tuple(tuple)]);
        }
        prop_assert_eq!(Parameter::tuple(tuple), member);
    }

    /// Integer addition trees evaluate to the numeric sum
    #[test]
    fn addition_tree_sums(values in prop::collection::vec(-1000i64..1000, 1..8)) {
        let mut context = Context::new();
        let mut stack = VarStack::new(&mut context);

        let mut tree = Parameter::value(Data::Int(values[0]));
        for value in &values[1..] {
            let expression = Expression::infix(
                tree,
                Operator::Plus,
                Parameter::value(Data::Int(*value)),
            )
            .unwrap();
            tree = Parameter::expression(expression);
        }

        let total: i64 = values.iter().sum();
        prop_assert_eq!(tree.evaluate(&mut stack), Data::Int(total));
    }
}

#[test]
fn keyword_decay_table() {
    let mut context = Context::new();
    let mut stack = VarStack::new(&mut context);

    assert_eq!(
        Parameter::keyword_reduced(Keyword::True).evaluate(&mut stack),
        Data::Bool(true)
    );
    assert_eq!(
        Parameter::keyword_reduced(Keyword::Yes).evaluate(&mut stack),
        Data::Bool(true)
    );
    assert_eq!(
        Parameter::keyword_reduced(Keyword::False).evaluate(&mut stack),
        Data::Bool(false)
    );
    assert_eq!(
        Parameter::keyword_reduced(Keyword::No).evaluate(&mut stack),
        Data::Bool(false)
    );
    assert_eq!(
        Parameter::keyword(Keyword::Nil).evaluate(&mut stack),
        Data::Void
    );
}
