//! Flattening of eager-load navigation lambdas into dotted paths.
//!
//! ```text
//! x => x.Children.Select(y => y.Parent.Children.Select(z => z.Parent))
//! ```
//!
//! flattens to `Children.Parent.Children.Parent`.

use crate::error::{Error, Result};
use crate::host::{HostExpr, QueryMethod};

/// Flatten a one-parameter navigation lambda into a dotted path.
pub fn flatten(navigation: &HostExpr) -> Result<String> {
    let HostExpr::Lambda { params, body } = navigation else {
        return Err(invalid(navigation));
    };
    let [(param, _)] = params.as_slice() else {
        return Err(invalid(navigation));
    };
    let mut segments = Vec::new();
    collect(body, param, &mut segments).map_err(|_| invalid(navigation))?;
    if segments.is_empty() {
        return Err(invalid(navigation));
    }
    Ok(segments.join("."))
}

fn collect(expr: &HostExpr, param: &str, out: &mut Vec<String>) -> Result<()> {
    match expr {
        HostExpr::Parameter { name, .. } if name == param => Ok(()),
        HostExpr::Member { target, member } => {
            collect(target, param, out)?;
            out.push(member.clone());
            Ok(())
        }
        HostExpr::Call { args, .. }
            if matches!(
                expr.query_method(),
                Some(QueryMethod::Select | QueryMethod::SelectMany)
            ) =>
        {
            let [source, nested] = args.as_slice() else {
                return Err(invalid(expr));
            };
            collect(source, param, out)?;
            out.push(flatten(nested)?);
            Ok(())
        }
        other => Err(invalid(other)),
    }
}

fn invalid(expr: &HostExpr) -> Error {
    Error::unsupported(format!("'{}' is not a navigation path", expr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostType, lambda, lit, source};
    use crate::translator::translate;
    use crate::catalog::{RecordDef, TypeCatalog};

    #[test]
    fn test_flatten_nested_selects() {
        let nav = lambda("x", |x| {
            x.member("Children").select(lambda("y", |y| {
                y.member("Parent")
                    .member("Children")
                    .select(lambda("z", |z| z.member("Parent")))
            }))
        });
        assert_eq!(flatten(&nav).unwrap(), "Children.Parent.Children.Parent");
    }

    #[test]
    fn test_flatten_rejects_non_navigation() {
        assert!(flatten(&lambda("x", |x| x)).is_err());
        assert!(flatten(&lambda("x", |x| x.member("Age").plus(1))).is_err());
        assert!(flatten(&lambda("x", |_| lit("Children").member("Parent"))).is_err());
    }

    #[test]
    fn test_separate_include_chains() {
        let types = TypeCatalog::new().with_record(
            RecordDef::new("tree.Node")
                .field("A", HostType::record("tree.Node"))
                .field("B", HostType::record("tree.Node"))
                .field("C", HostType::record("tree.Node")),
        );
        let expr = source(HostType::record("tree.Node"))
            .include(lambda("x", |x| x.member("A")))
            .then_include(lambda("x", |x| x.member("B")))
            .include(lambda("x", |x| x.member("A")))
            .then_include(lambda("x", |x| x.member("C")));
        let ast = translate(&expr, &types, None).unwrap();
        assert_eq!(ast.include_paths(), vec!["A.B", "A.C"]);
    }
}
