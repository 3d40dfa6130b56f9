use crate::plugins::registry::PluginInfo;

pub const DECISION_SYSTEM_PROMPT: &str = "\
You are Ordenador, a desktop assistant that operates a graphical desktop for the user.

Given the user's task, the history of previous steps and a screenshot, reply with exactly ONE
JSON object of the form {\"command\": \"<name>\", \"arguments\": {...}}.

Commands:
- click: {\"x\": <number>, \"y\": <number>, \"label\": \"<what is at that spot>\"}
  Coordinates are ALWAYS relative to the attached (downscaled) screenshot. Whenever you
  identify an element visually, the label is mandatory.
- type_text: {\"text\": \"<literal text>\"}
- launch_program: {\"alias\": \"<program name or path>\", \"args\": [\"...\"]}
- run_plugin: {\"name\": \"<plugin name>\"}
- request_higher_detail: {\"reason\": \"<why the current image is not enough>\"}
  Use this instead of guessing when a critical detail (e.g. a button caption) is unreadable.
- task_complete: {\"message\": \"<short note for the user>\"} once the task is done.
- reply_to_user: {\"message\": \"...\"} only to ask the user something you cannot decide.

Rules:
- Decide the next step from the original task and the history.
- If the previous command failed you MUST choose a different strategy, e.g. when
  launch_program reports the program was not found, look for its icon and click it.";

pub const CALIBRATION_SYSTEM_PROMPT: &str = "\
You are a precise visual element locator. Find exactly one element on the screenshot and
reply with a single click command carrying its coordinates and name, e.g.
{\"command\": \"click\", \"arguments\": {\"x\": 50, \"y\": 1050, \"label\": \"Start Menu\"}}.
Coordinates are relative to the attached (downscaled) screenshot. The label is mandatory.
If the element is not visible, reply {\"command\": \"task_complete\", \"arguments\": {\"message\": \"not found\"}}.";

pub fn format_plugins(plugins: &[PluginInfo]) -> String {
    if plugins.is_empty() {
        return "No plugins available.".to_string();
    }
    plugins
        .iter()
        .map(|p| format!("- {}: {}", p.name, p.description))
        .collect::<Vec<_>>()
        .join("\n")
}

pub const NO_SCREENSHOT: &str = "No screenshot is available for this step. \
Decide from the task and history, or use request_higher_detail to capture again.";

/// `screen` is the attached image size, or `None` when no image is sent.
pub fn build_decision_prompt(
    task: &str,
    history_summary: &str,
    screen: Option<(u32, u32)>,
    plugins: &[PluginInfo],
) -> String {
    let screen = match screen {
        Some((width, height)) => format!("The attached image is {width}x{height} pixels."),
        None => NO_SCREENSHOT.to_string(),
    };
    format!(
        "Original task: '{task}'.\n{history_summary}\n\n\
         {screen}\n\
         Available plugins:\n{plugins}\n\n\
         What is the next step?",
        plugins = format_plugins(plugins),
    )
}

pub fn build_calibration_prompt(element: &str, width: u32, height: u32) -> String {
    format!("Task: find the '{element}' element on the screen. The image is {width}x{height} pixels.")
}
