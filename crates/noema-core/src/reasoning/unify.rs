use super::rule::{PredicateTerm, RuleTerm, TriplePattern};
use crate::types::Term;
use std::collections::BTreeMap;

/// Variable assignments. Ordered so the same bindings always print, hash and
/// iterate the same way.
pub type Bindings = BTreeMap<String, Term>;

fn bind(term: &RuleTerm, value: &Term, bindings: &mut Bindings) -> bool {
    match term {
        RuleTerm::Const(c) => c == value,
        RuleTerm::Var(name) => match bindings.get(name) {
            Some(existing) => existing == value,
            None => {
                bindings.insert(name.clone(), value.clone());
                true
            }
        },
    }
}

/// Extend `bindings` so that `pattern` matches the given triple.
pub fn match_triple(
    pattern: &TriplePattern,
    subject: &Term,
    predicate: &str,
    object: &Term,
    bindings: &Bindings,
) -> Option<Bindings> {
    let mut out = bindings.clone();
    let predicate_ok = match &pattern.predicate {
        PredicateTerm::Const(p) => p == predicate,
        PredicateTerm::Var(name) => {
            bind(&RuleTerm::Var(name.clone()), &Term::literal(predicate), &mut out)
        }
    };
    if predicate_ok && bind(&pattern.subject, subject, &mut out) && bind(&pattern.object, object, &mut out)
    {
        Some(out)
    } else {
        None
    }
}

pub fn resolve(term: &RuleTerm, bindings: &Bindings) -> Option<Term> {
    match term {
        RuleTerm::Const(c) => Some(c.clone()),
        RuleTerm::Var(name) => bindings.get(name).cloned(),
    }
}

pub fn resolve_predicate(predicate: &PredicateTerm, bindings: &Bindings) -> Option<String> {
    match predicate {
        PredicateTerm::Const(p) => Some(p.clone()),
        PredicateTerm::Var(name) => bindings.get(name).map(|t| t.value().to_string()),
    }
}

/// Ground a pattern. `None` while any position is still a free variable.
pub fn instantiate(pattern: &TriplePattern, bindings: &Bindings) -> Option<(Term, String, Term)> {
    Some((
        resolve(&pattern.subject, bindings)?,
        resolve_predicate(&pattern.predicate, bindings)?,
        resolve(&pattern.object, bindings)?,
    ))
}

/// Substitute what is known and leave the rest as variables.
pub fn substitute(pattern: &TriplePattern, bindings: &Bindings) -> TriplePattern {
    let term = |t: &RuleTerm| match resolve(t, bindings) {
        Some(c) => RuleTerm::Const(c),
        None => t.clone(),
    };
    let predicate = match resolve_predicate(&pattern.predicate, bindings) {
        Some(p) => PredicateTerm::Const(p),
        None => pattern.predicate.clone(),
    };
    TriplePattern::new(term(&pattern.subject), predicate, term(&pattern.object))
}

/// Bindings rendered canonically.
pub fn binding_key(bindings: &Bindings) -> String {
    bindings
        .iter()
        .map(|(k, v)| format!("{}={}", k, v.key()))
        .collect::<Vec<_>>()
        .join(";")
}

/// Shape of a goal with variable names erased, used to spot a goal that is
/// already being proved higher up the stack.
pub fn variant_key(pattern: &TriplePattern) -> String {
    let mut names: Vec<String> = Vec::new();
    let mut slot = |t: &str| {
        let index = match names.iter().position(|n| n == t) {
            Some(i) => i,
            None => {
                names.push(t.to_string());
                names.len() - 1
            }
        };
        format!("?{}", index)
    };
    let subject = match &pattern.subject {
        RuleTerm::Var(v) => slot(v),
        RuleTerm::Const(c) => c.key(),
    };
    let predicate = match &pattern.predicate {
        PredicateTerm::Var(v) => slot(v),
        PredicateTerm::Const(p) => p.clone(),
    };
    let object = match &pattern.object {
        RuleTerm::Var(v) => slot(v),
        RuleTerm::Const(c) => c.key(),
    };
    format!("{} {} {}", subject, predicate, object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_binds_and_checks() {
        let p = TriplePattern::parse("?x is-a ?x").unwrap();
        let dog = Term::entity("dog");
        let mammal = Term::entity("mammal");
        assert!(match_triple(&p, &dog, "is-a", &mammal, &Bindings::new()).is_none());
        assert!(match_triple(&p, &dog, "is-a", &dog, &Bindings::new()).is_some());

        let q = TriplePattern::parse("?x is-a ?y").unwrap();
        let b = match_triple(&q, &dog, "is-a", &mammal, &Bindings::new()).unwrap();
        assert_eq!(b.get("y"), Some(&mammal));
        assert_eq!(
            instantiate(&TriplePattern::parse("?y has ?x").unwrap(), &b),
            Some((mammal, "has".to_string(), dog))
        );
    }

    #[test]
    fn test_predicate_variable() {
        let p = TriplePattern::parse("?x ?p ?y").unwrap();
        let b = match_triple(&p, &Term::entity("a"), "owns", &Term::entity("b"), &Bindings::new())
            .unwrap();
        assert_eq!(resolve_predicate(&p.predicate, &b), Some("owns".to_string()));
    }

    #[test]
    fn test_variant_key_ignores_names() {
        let a = TriplePattern::parse("dog is-a ?y").unwrap();
        let b = TriplePattern::parse("dog is-a ?z").unwrap();
        let c = TriplePattern::parse("?z is-a ?z").unwrap();
        assert_eq!(variant_key(&a), variant_key(&b));
        assert_ne!(variant_key(&a), variant_key(&c));
    }
}
