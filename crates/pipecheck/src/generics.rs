use crate::schema::{
    GenericBindings, NominalSchema, RecordSchema, Resolution, SchemaResolver, SchemaType, TypeRef,
};

/// Rewrites every bound variable in `ty`, bottom-up. Unbound variables stay.
pub fn substitute_ref(ty: &TypeRef, bindings: &GenericBindings) -> TypeRef {
    match ty {
        TypeRef::Var { name } => bindings.get(name).cloned().unwrap_or_else(|| ty.clone()),
        TypeRef::Named { name, args } => TypeRef::Named {
            name: name.clone(),
            args: args.iter().map(|arg| substitute_ref(arg, bindings)).collect(),
        },
        TypeRef::Any => TypeRef::Any,
    }
}

/// Applies `bindings` to a resolved schema.
///
/// A bare type variable bound to a named reference has to be looked up, so
/// the result is a [`Resolution`] rather than a plain schema.
pub fn substitute(
    schema: &SchemaType,
    bindings: &GenericBindings,
    resolver: &dyn SchemaResolver,
) -> Resolution<SchemaType> {
    if bindings.is_empty() {
        return Resolution::Resolved(schema.clone());
    }

    match schema {
        SchemaType::TypeVar { name } => match bindings.get(name) {
            Some(bound) => resolver.resolve_type(bound),
            None => Resolution::Resolved(schema.clone()),
        },
        SchemaType::Record(record) => Resolution::Resolved(SchemaType::Record(RecordSchema {
            name: record.name.clone(),
            args: record
                .args
                .iter()
                .map(|arg| substitute_ref(arg, bindings))
                .collect(),
            type_params: record.type_params.clone(),
            fields: record
                .fields
                .iter()
                .map(|(key, ty)| (key.clone(), substitute_ref(ty, bindings)))
                .collect(),
        })),
        SchemaType::Nominal(nominal) => Resolution::Resolved(SchemaType::Nominal(NominalSchema {
            name: nominal.name.clone(),
            args: nominal
                .args
                .iter()
                .map(|arg| substitute_ref(arg, bindings))
                .collect(),
            parents: nominal.parents.clone(),
        })),
        SchemaType::Any => Resolution::Resolved(SchemaType::Any),
    }
}

/// Pairs `params` with `args` positionally. Missing arguments are left out.
pub fn bind_params(params: &[String], args: &[TypeRef]) -> GenericBindings {
    params.iter().cloned().zip(args.iter().cloned()).collect()
}

/// Replaces every variable with `Any`.
pub fn erase_ref(ty: &TypeRef) -> TypeRef {
    match ty {
        TypeRef::Var { .. } | TypeRef::Any => TypeRef::Any,
        TypeRef::Named { name, args } => TypeRef::Named {
            name: name.clone(),
            args: args.iter().map(erase_ref).collect(),
        },
    }
}

/// [`erase_ref`] lifted over a resolved schema.
pub fn erase(schema: &SchemaType) -> SchemaType {
    match schema {
        SchemaType::TypeVar { .. } | SchemaType::Any => SchemaType::Any,
        SchemaType::Record(record) => SchemaType::Record(RecordSchema {
            name: record.name.clone(),
            args: record.args.iter().map(erase_ref).collect(),
            type_params: record.type_params.clone(),
            fields: record
                .fields
                .iter()
                .map(|(key, ty)| (key.clone(), erase_ref(ty)))
                .collect(),
        }),
        SchemaType::Nominal(nominal) => SchemaType::Nominal(NominalSchema {
            name: nominal.name.clone(),
            args: nominal.args.iter().map(erase_ref).collect(),
            parents: nominal.parents.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use indexmap::IndexMap;

    use super::*;
    use crate::stage::StageDescriptor;

    struct Prims;

    impl SchemaResolver for Prims {
        fn resolve_stage(&self, _identity: &str) -> Resolution<Arc<StageDescriptor>> {
            Resolution::Unresolvable
        }

        fn resolve_type(&self, ty: &TypeRef) -> Resolution<SchemaType> {
            match ty {
                TypeRef::Named { name, args } => Resolution::Resolved(SchemaType::Nominal(NominalSchema {
                    name: name.clone(),
                    args: args.clone(),
                    parents: Vec::new(),
                })),
                TypeRef::Var { name } => Resolution::Resolved(SchemaType::TypeVar { name: name.clone() }),
                TypeRef::Any => Resolution::Resolved(SchemaType::Any),
            }
        }

        fn is_nominal_subtype(&self, _sub: &str, _sup: &str) -> bool {
            false
        }
    }

    fn bindings(pairs: &[(&str, TypeRef)]) -> GenericBindings {
        pairs
            .iter()
            .map(|(name, ty)| (name.to_string(), ty.clone()))
            .collect()
    }

    #[test]
    fn substitutes_nested_container_fields() {
        let mut fields = IndexMap::new();
        fields.insert("x".to_string(), TypeRef::var("T"));
        fields.insert(
            "xs".to_string(),
            TypeRef::generic("List", vec![TypeRef::var("T")]),
        );
        let record = SchemaType::Record(RecordSchema {
            name: "Batch".to_string(),
            args: vec![TypeRef::var("T")],
            type_params: vec!["T".to_string()],
            fields,
        });

        let bound = substitute(&record, &bindings(&[("T", TypeRef::named("Int"))]), &Prims);
        let Resolution::Resolved(SchemaType::Record(record)) = bound else {
            panic!("expected record, got {bound:?}");
        };
        assert_eq!(record.fields["x"], TypeRef::named("Int"));
        assert_eq!(record.fields["xs"].to_string(), "List<Int>");
        assert_eq!(SchemaType::Record(record).to_string(), "Batch<Int>");
    }

    #[test]
    fn bare_variable_resolves_through_binding() {
        let schema = SchemaType::TypeVar {
            name: "T".to_string(),
        };
        let bound = substitute(&schema, &bindings(&[("T", TypeRef::named("Str"))]), &Prims);
        assert_eq!(bound.resolved().map(|s| s.to_string()), Some("Str".to_string()));
    }

    #[test]
    fn unbound_variables_survive_and_can_be_erased() {
        let ty = TypeRef::generic("Dict", vec![TypeRef::var("K"), TypeRef::var("V")]);
        let partial = substitute_ref(&ty, &bindings(&[("K", TypeRef::named("Str"))]));
        assert_eq!(partial.free_vars(), vec!["V".to_string()]);
        assert_eq!(erase_ref(&partial).to_string(), "Dict<Str, Any>");
    }

    #[test]
    fn bind_params_skips_missing_arguments() {
        let params = vec!["K".to_string(), "V".to_string()];
        let bound = bind_params(&params, &[TypeRef::named("Str")]);
        assert_eq!(bound.len(), 1);
        assert_eq!(bound.get("K"), Some(&TypeRef::named("Str")));
    }
}
