use error_stack::Report;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;

use crate::infrastructure::k8s::StoreError;

/// Render a label selector in the query syntax accepted by the API server.
///
/// `matchLabels` entries become equality requirements and `matchExpressions`
/// are rendered with their set-based operators. An empty selector renders as
/// an empty string, which selects everything.
///
/// # Errors
///
/// - [`StoreError::InvalidSelector`] if an expression uses an unknown operator
///   or a set operator without values
pub(crate) fn to_query(selector: &LabelSelector) -> Result<String, Report<StoreError>> {
    let mut requirements: Vec<String> = selector
        .match_labels
        .iter()
        .flatten()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();

    for expression in selector.match_expressions.iter().flatten() {
        requirements.push(render_expression(expression)?);
    }

    Ok(requirements.join(","))
}

fn render_expression(expression: &LabelSelectorRequirement) -> Result<String, Report<StoreError>> {
    let key = &expression.key;
    let values = expression.values.as_deref().unwrap_or_default();
    match expression.operator.as_str() {
        "In" | "NotIn" if values.is_empty() => Err(Report::new(StoreError::InvalidSelector {
            message: format!("operator {} on {key} requires values", expression.operator),
        })),
        "In" => Ok(format!("{key} in ({})", values.join(","))),
        "NotIn" => Ok(format!("{key} notin ({})", values.join(","))),
        "Exists" => Ok(key.clone()),
        "DoesNotExist" => Ok(format!("!{key}")),
        other => Err(Report::new(StoreError::InvalidSelector {
            message: format!("unsupported operator {other} on {key}"),
        })),
    }
}
