//! Prompt construction for error analysis requests.

use crate::context::ErrorContext;
use crate::observability::sanitize_for_log;

/// Longest stack trace forwarded to the analysis service.
const MAX_STACK_TRACE_CHARS: usize = 4000;

pub const SYSTEM_PROMPT: &str = "You are a site reliability engineer analysing production errors in a distributed system. Answer using exactly these headed sections: Explanation:, Root Causes:, Remediation Steps:, Prevention Strategies:, Confidence:. Use bullet points for lists and give confidence as a number between 0 and 1.";

/// Render the user prompt for one error context.
pub fn build_analysis_prompt(context: &ErrorContext) -> String {
    let mut prompt = String::new();
    prompt.push_str("Analyse the following error.\n\n");
    prompt.push_str(&format!("Exception type: {}\n", context.error_type));
    prompt.push_str(&format!("Message: {}\n", sanitize_for_log(&context.message)));
    prompt.push_str(&format!("Service: {}\n", context.service_name));
    prompt.push_str(&format!("Operation: {}\n", context.operation_name));
    if let Some(component) = &context.component_id {
        prompt.push_str(&format!("Component: {}\n", component));
    }
    prompt.push_str(&format!("Timestamp: {}\n", context.timestamp.to_rfc3339()));
    prompt.push_str(&format!("Severity: {}\n", context.severity));

    if let Some(trace) = &context.stack_trace {
        let truncated: String = trace.chars().take(MAX_STACK_TRACE_CHARS).collect();
        prompt.push_str("\nStack trace:\n");
        prompt.push_str(&truncated);
        if trace.chars().count() > MAX_STACK_TRACE_CHARS {
            prompt.push_str("\n[truncated]");
        }
        prompt.push('\n');
    }

    if !context.additional_context.is_empty() {
        let mut keys: Vec<&String> = context.additional_context.keys().collect();
        keys.sort();
        prompt.push_str("\nContext:\n");
        for key in keys {
            prompt.push_str(&format!("- {}: {}\n", key, context.additional_context[key]));
        }
    }

    if !context.dependencies.is_empty() {
        prompt.push_str("\nKnown dependencies:\n");
        for dep in &context.dependencies {
            prompt.push_str(&format!(
                "- {} ({:?}, weight {:.2})\n",
                dep.component_id, dep.direction, dep.weight
            ));
        }
    }

    prompt
}
