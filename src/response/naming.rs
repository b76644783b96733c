//! Series naming: metric display labels and alias templates
//!
//! A series name is either rendered from the target's alias template or
//! composed from the grouping key path and the metric's display label. The
//! alias engine substitutes `{{...}}` placeholders and leaves anything it does
//! not recognize verbatim, so a typo'd placeholder shows up in the legend
//! instead of silently vanishing.

use crate::query::types::{MetricType, QueryTarget};
use crate::response::parser::SeriesDraft;
use regex::Regex;

/// Display label for a metric tag. Unknown tags render verbatim, which is how
/// percentile components ("p75") and future metric types get their labels.
pub fn metric_label(tag: &str) -> &str {
    match tag {
        "count" => "Count",
        "avg" => "Average",
        "sum" => "Sum",
        "max" => "Max",
        "min" => "Min",
        "extended_stats" => "Extended Stats",
        "percentiles" => "Percentiles",
        "cardinality" => "Unique Count",
        "moving_avg" => "Moving Average",
        "derivative" => "Derivative",
        "cumulative_sum" => "Cumulative Sum",
        "bucket_script" => "Bucket Script",
        "raw_document" => "Raw Document",
        "std_deviation" => "Std Dev",
        "std_deviation_bounds_upper" => "Std Dev Upper",
        "std_deviation_bounds_lower" => "Std Dev Lower",
        other => other,
    }
}

/// "<Label> <field>" description of a metric, e.g. "Average @value".
/// Count has no field and stays bare.
pub fn describe_metric(tag: &str, field: &str) -> String {
    let label = metric_label(tag);
    if tag == "count" || field.is_empty() {
        return label.to_string();
    }
    format!("{} {}", label, field)
}

/// Compute the final display name for one extracted series.
///
/// `metric_type_count` is the number of distinct metric tags across the
/// target's series: with a single one the grouping keys alone identify a
/// series, with several the metric label is appended to disambiguate.
pub(crate) fn series_name(
    draft: &SeriesDraft,
    target: &QueryTarget,
    metric_type_count: usize,
) -> String {
    let mut metric_name = metric_label(&draft.metric_tag).to_string();
    let field = draft.field.as_str();

    if let Some(alias) = &target.alias {
        return render_alias(alias, draft, &metric_name, field);
    }

    let metric_type = MetricType::from_tag(&draft.metric_tag);
    if !field.is_empty() && metric_type.is_pipeline() {
        if metric_type.has_multiple_bucket_paths() {
            metric_name = script_description(draft, target).unwrap_or(metric_name);
        } else {
            // A single-path pipeline's field names its source metric.
            match target.metric_by_id(field) {
                Some(source) => {
                    metric_name.push(' ');
                    metric_name
                        .push_str(&describe_metric(source.metric_type.as_str(), source.field_str()));
                }
                None => metric_name = "Unset".to_string(),
            }
        }
    } else if !field.is_empty() {
        metric_name.push(' ');
        metric_name.push_str(field);
    }

    if draft.tags.is_empty() {
        return metric_name;
    }
    let joined = draft
        .tags
        .iter()
        .map(|(_, value)| value.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    if metric_type_count == 1 {
        joined
    } else {
        format!("{} {}", joined, metric_name)
    }
}

/// Render a bucket_script series as its script text with every
/// `params.<name>` replaced by the referenced metric's description, e.g.
/// `"params.var1 * params.var2"` becomes `"Sum @value * Max @value"`.
fn script_description(draft: &SeriesDraft, target: &QueryTarget) -> Option<String> {
    let metric = target.metric_by_id(&draft.metric_id)?;
    let mut name = metric.settings.str_value("script").ok()??;
    for variable in &metric.pipeline_variables {
        if let Some(source) = target.metric_by_id(&variable.pipeline_agg) {
            name = name.replace(
                &format!("params.{}", variable.name),
                &describe_metric(source.metric_type.as_str(), source.field_str()),
            );
        }
    }
    Some(name)
}

fn render_alias(template: &str, draft: &SeriesDraft, metric_name: &str, field: &str) -> String {
    let pattern = Regex::new(r"\{\{([\s\S]+?)\}\}").unwrap();
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in pattern.captures_iter(template) {
        let whole = match caps.get(0) {
            Some(m) => m,
            None => continue,
        };
        let spec = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        out.push_str(&template[last..whole.start()]);
        match resolve_placeholder(spec, draft, metric_name, field) {
            Some(value) => out.push_str(&value),
            // Unknown placeholders stay verbatim.
            None => out.push_str(whole.as_str()),
        }
        last = whole.end();
    }
    out.push_str(&template[last..]);
    out
}

fn resolve_placeholder(
    spec: &str,
    draft: &SeriesDraft,
    metric_name: &str,
    field: &str,
) -> Option<String> {
    if let Some(name) = spec.strip_prefix("term ") {
        return tag_value(draft, name).map(str::to_string);
    }
    if let Some(value) = tag_value(draft, spec) {
        return Some(value.to_string());
    }
    match spec {
        "metric" => Some(metric_name.to_string()),
        "field" => Some(field.to_string()),
        _ => None,
    }
}

fn tag_value<'a>(draft: &'a SeriesDraft, key: &str) -> Option<&'a str> {
    draft
        .tags
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}
