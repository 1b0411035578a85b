//! Prompt text sent to the revision oracle

use super::{RevisionRequest, TestRequest};

pub const SYSTEM_PROMPT: &str = "You are a helpful coding assistant working on a Python project \
tested with pytest. Answer by calling the provided function.";

/// Prompt asking for a fixed version of a failing test
pub fn revision_prompt(request: &RevisionRequest) -> String {
    let mut prompt = String::from(
        "The test below was generated for the function that follows it and is currently \
failing with the pytest output shown. Revise the test code so that it passes.\n",
    );
    prompt.push_str("* Do not use fixtures; the test must run on its own.\n");
    prompt.push_str(&format!(
        "* Keep the test function name `{}`.\n",
        request.test_name
    ));
    prompt.push_str("* Return imports separately from the test code.\n\n");

    prompt.push_str(&format!("Current test code:\n{}\n\n", request.test_code));

    if request.function_code.is_empty() {
        prompt.push_str("The function under test could not be identified.\n\n");
    } else {
        prompt.push_str(&format!("Function code:\n{}\n\n", request.function_code));
    }

    if let (Some(start), Some(end)) = (request.start_line, request.end_line) {
        prompt.push_str(&format!("The function spans lines {}-{}.", start, end));
        if request.missing_lines.is_empty() {
            prompt.push_str(" Every line is executed by the test suite.\n\n");
        } else {
            let lines: Vec<String> = request.missing_lines.iter().map(u32::to_string).collect();
            prompt.push_str(&format!(
                " Lines never executed by the test suite: {}.\n\n",
                lines.join(", ")
            ));
        }
    }

    prompt.push_str(&format!("Pytest output:\n{}\n", request.failure_output));
    prompt
}

/// Prompt asking for a new unit test
pub fn test_prompt(request: &TestRequest) -> String {
    let module = request
        .function_file
        .trim_end_matches(".py")
        .replace('/', ".");

    let mut prompt = String::from("Write a pytest unit test.\n\n");
    prompt.push_str(&format!(
        "Code of the function to test:\n{}\n\n",
        request.function_code
    ));
    prompt.push_str(&format!(
        "The function lives in `{}`. Import it with `from {} import ...`.\n\n",
        request.function_file, module
    ));
    prompt.push_str(&format!("Call the test `{}`.\n", request.test_name));
    prompt
}
