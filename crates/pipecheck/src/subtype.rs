use std::collections::HashSet;

use crate::schema::{Resolution, SchemaResolver, SchemaType, TypeRef};

/// Nesting of record comparisons beyond which a pair is assumed to hold.
const MAX_RECORD_DEPTH: usize = 32;

type Seen = HashSet<(String, String)>;

/// Why the oracle could not answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupFailure {
    /// A referenced type may still be declared by a later pass.
    Deferred,
    Unresolved(TypeRef),
}

/// The non-structural rule that accepted a pair of schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    Exact,
    Wildcard,
    Nominal,
}

/// Exact name, then wildcard, then nominal parent chain.
///
/// A nominal parent only satisfies a requirement written without type
/// arguments; applied generics are invariant.
pub fn match_rule(
    produced: &SchemaType,
    required: &SchemaType,
    resolver: &dyn SchemaResolver,
) -> Option<MatchRule> {
    let same_shape = matches!(
        (produced, required),
        (SchemaType::Record(_), SchemaType::Record(_))
            | (SchemaType::Nominal(_), SchemaType::Nominal(_))
            | (SchemaType::TypeVar { .. }, SchemaType::TypeVar { .. })
    );
    if same_shape && produced.qualified_name() == required.qualified_name() {
        return Some(MatchRule::Exact);
    }

    if required.is_any() || produced.is_any() {
        return Some(MatchRule::Wildcard);
    }

    if let (SchemaType::Nominal(sub), SchemaType::Nominal(sup)) = (produced, required) {
        if sup.args.is_empty() && resolver.is_nominal_subtype(&sub.name, &sup.name) {
            return Some(MatchRule::Nominal);
        }
    }

    None
}

/// Answers "can a value of `produced` flow where `required` is expected".
pub struct SubtypeOracle<'a> {
    resolver: &'a dyn SchemaResolver,
}

impl<'a> SubtypeOracle<'a> {
    pub fn new(resolver: &'a dyn SchemaResolver) -> Self {
        Self { resolver }
    }

    pub fn assignable(&self, produced: &TypeRef, required: &TypeRef) -> Result<bool, LookupFailure> {
        let mut seen = Seen::new();
        self.refs_assignable(produced, required, &mut seen, 0)
    }

    fn refs_assignable(
        &self,
        produced: &TypeRef,
        required: &TypeRef,
        seen: &mut Seen,
        depth: usize,
    ) -> Result<bool, LookupFailure> {
        if produced == required || required.is_any() || produced.is_any() {
            return Ok(true);
        }

        let produced = self.lookup(produced)?;
        let required = self.lookup(required)?;
        self.schemas_assignable(&produced, &required, seen, depth)
    }

    fn schemas_assignable(
        &self,
        produced: &SchemaType,
        required: &SchemaType,
        seen: &mut Seen,
        depth: usize,
    ) -> Result<bool, LookupFailure> {
        if match_rule(produced, required, self.resolver).is_some() {
            return Ok(true);
        }

        let (SchemaType::Record(produced), SchemaType::Record(required)) = (produced, required) else {
            return Ok(false);
        };

        // Recursive records: a pair already under comparison is assumed to
        // hold. Recursion through growing arguments never repeats a pair, so
        // nesting is capped as well.
        let pair = (
            SchemaType::Record(produced.clone()).qualified_name(),
            SchemaType::Record(required.clone()).qualified_name(),
        );
        if depth >= MAX_RECORD_DEPTH || !seen.insert(pair) {
            return Ok(true);
        }

        for (key, required_ty) in &required.fields {
            let Some(produced_ty) = produced.fields.get(key) else {
                return Ok(false);
            };
            if !self.refs_assignable(produced_ty, required_ty, seen, depth + 1)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn lookup(&self, ty: &TypeRef) -> Result<SchemaType, LookupFailure> {
        match self.resolver.resolve_type(ty) {
            Resolution::Resolved(schema) => Ok(schema),
            Resolution::Deferred => Err(LookupFailure::Deferred),
            Resolution::Unresolvable => Err(LookupFailure::Unresolved(ty.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::{resolve_program, Registry};

    fn registry(source: &str) -> Registry {
        let program = crate::parse_source(source).expect("source should parse");
        let (registry, diagnostics) = resolve_program(&program, 8);
        assert!(diagnostics.is_empty(), "unexpected diagnostics: {diagnostics:?}");
        registry
    }

    fn named(name: &str) -> TypeRef {
        TypeRef::named(name)
    }

    #[test]
    fn nominal_parent_chain_is_transitive() {
        let registry = registry("");
        let oracle = SubtypeOracle::new(&registry);
        assert_eq!(oracle.assignable(&named("Bool"), &named("Float")), Ok(true));
        assert_eq!(oracle.assignable(&named("Float"), &named("Int")), Ok(false));
        assert_eq!(oracle.assignable(&named("Str"), &named("Int")), Ok(false));
    }

    #[test]
    fn wildcard_absorbs_both_directions() {
        let registry = registry("");
        let oracle = SubtypeOracle::new(&registry);
        assert_eq!(oracle.assignable(&named("Str"), &TypeRef::Any), Ok(true));
        assert_eq!(oracle.assignable(&TypeRef::Any, &named("Str")), Ok(true));
    }

    #[test]
    fn applied_generics_are_invariant() {
        let registry = registry("");
        let oracle = SubtypeOracle::new(&registry);
        let ints = TypeRef::generic("List", vec![named("Int")]);
        let floats = TypeRef::generic("List", vec![named("Float")]);
        assert_eq!(oracle.assignable(&ints, &ints.clone()), Ok(true));
        assert_eq!(oracle.assignable(&ints, &floats), Ok(false));
    }

    #[test]
    fn records_compare_structurally_with_width() {
        let registry = registry(
            "schema Wide { a: Int, b: Str };
             schema Narrow { a: Float };
             schema Other { c: Int };",
        );
        let oracle = SubtypeOracle::new(&registry);
        assert_eq!(oracle.assignable(&named("Wide"), &named("Narrow")), Ok(true));
        assert_eq!(oracle.assignable(&named("Narrow"), &named("Wide")), Ok(false));
        assert_eq!(oracle.assignable(&named("Wide"), &named("Other")), Ok(false));
    }

    #[test]
    fn nominal_never_unifies_with_record() {
        let registry = registry("schema Boxed { value: Int };");
        let oracle = SubtypeOracle::new(&registry);
        assert_eq!(oracle.assignable(&named("Int"), &named("Boxed")), Ok(false));
    }

    #[test]
    fn recursive_records_terminate() {
        let registry = registry(
            "schema Left { next: Left, id: Int };
             schema Right { next: Right };",
        );
        let oracle = SubtypeOracle::new(&registry);
        assert_eq!(oracle.assignable(&named("Left"), &named("Right")), Ok(true));
    }

    #[test]
    fn recursion_through_growing_arguments_terminates() {
        let registry = registry(
            "schema Chain<T> { next: Chain<List<T>>, id: Int };
             schema Link<T> { next: Link<List<T>> };
             schema Strict<T> { next: Strict<List<T>>, label: Str };",
        );
        let oracle = SubtypeOracle::new(&registry);
        let ints = |name: &str| TypeRef::generic(name, vec![named("Int")]);
        assert_eq!(oracle.assignable(&ints("Chain"), &ints("Link")), Ok(true));
        assert_eq!(oracle.assignable(&ints("Chain"), &ints("Strict")), Ok(false));
    }

    #[test]
    fn unknown_field_type_propagates() {
        let registry = registry("schema Wide { a: Int };");
        let oracle = SubtypeOracle::new(&registry);
        assert_eq!(
            oracle.assignable(&named("Wide"), &named("Ghost")),
            Err(LookupFailure::Unresolved(named("Ghost")))
        );
    }
}
