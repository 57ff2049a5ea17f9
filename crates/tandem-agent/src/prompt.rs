//! System prompt assembly.
//!
//! One synthetic system message is prepended to every turn: the current
//! time in the user's timezone, behavioral policies, the role block, the
//! connected accounts, memory guidance, the tool-discovery protocol, and
//! (when a document is open in the viewer) its cache context.

use chrono::{TimeZone, Utc};
use tandem_store::Role;

/// A file currently open in the client's viewer.
#[derive(Debug, Clone)]
pub struct ViewerFile {
    pub cache_id: String,
    pub file_name: String,
    pub file_type: String,
}

/// Everything the prompt builder needs for one turn.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    /// IANA timezone name (e.g. `Europe/Berlin`).
    pub timezone: Option<String>,
    /// BCP-47 locale (e.g. `en-US`); drives the unit system.
    pub locale: Option<String>,
    pub role: Option<Role>,
    pub accounts: Vec<String>,
    pub viewer_file: Option<ViewerFile>,
    /// Whether the two-phase `search_tool` protocol is active.
    pub search_discovery: bool,
}

/// Build the system prompt for one turn.
pub fn build_system_prompt(ctx: &PromptContext) -> String {
    let mut prompt = String::new();

    // Current date/time in the user's timezone.
    let now = Utc::now();
    let timezone = ctx.timezone.as_deref().unwrap_or("UTC");
    let local = match timezone.parse::<chrono_tz::Tz>() {
        Ok(tz) => tz.from_utc_datetime(&now.naive_utc()).to_rfc2822(),
        Err(_) => now.to_rfc2822(),
    };
    prompt.push_str(&format!(
        "Current date and time: {local} (timezone: {timezone}).\n"
    ));

    // Locale-derived unit system.
    let units = match ctx.locale.as_deref() {
        Some(locale) if locale.starts_with("en-US") => "imperial (Fahrenheit, miles, pounds)",
        _ => "metric (Celsius, kilometers, kilograms)",
    };
    prompt.push_str(&format!("Use the {units} unit system.\n\n"));

    // Behavioral policies.
    prompt.push_str(
        "Be honest about uncertainty: say so when you do not know, and never \
         present a guess as fact.\n\
         Do not use emoji in your responses.\n\
         When a tool result contains a cached file reference, present it as a \
         markdown link of the form [preview-file:Name](cache-id).\n\
         When the user asks for several things at once, work through them one \
         item at a time and finish each before starting the next.\n\
         When searching files or email, bias toward recent items unless the \
         user asks otherwise.\n\n",
    );

    // Role block.
    if let Some(role) = &ctx.role {
        prompt.push_str(&format!("You are acting as the role \"{}\".\n", role.name));
        if !role.job_description.is_empty() {
            prompt.push_str(&format!("Role purpose: {}\n", role.job_description));
        }
        if !role.system_prompt.is_empty() {
            prompt.push_str(&format!("{}\n", role.system_prompt));
        }
        prompt.push('\n');
    }

    // Connected accounts.
    if !ctx.accounts.is_empty() {
        prompt.push_str(&format!(
            "Connected accounts: {}.\n\n",
            ctx.accounts.join(", ")
        ));
    }

    // Memory guidance.
    prompt.push_str(
        "You have a persistent memory graph for this role. Use \
         memory_search_nodes or memory_open_nodes to recall stored facts \
         before asking the user to repeat themselves, and memory_read_graph \
         to review everything stored.\n\n",
    );

    // Tool discovery protocol.
    if ctx.search_discovery {
        prompt.push_str(
            "Additional tools are available on demand. Call search_tool with a \
             short description of what you need; the matching tools become \
             available for your next step. Refine the query and call \
             search_tool again if the first results do not fit.\n\n",
        );
    }

    // Scheduling and role-switching rules.
    prompt.push_str(
        "Scheduling tools create jobs that run later under this role; confirm \
         the schedule back to the user after creating one. Never switch roles \
         on your own: role changes only happen through an explicit user \
         request.\n",
    );

    // Document context.
    if let Some(viewer) = &ctx.viewer_file {
        prompt.push_str(&format!(
            "\nThe user has a document open in the viewer: \"{}\" ({}). Its \
             cached copy is available to tools under the id {}. Never mention \
             this id in your output; refer to the document by name.\n",
            viewer.file_name, viewer.file_type, viewer.cache_id
        ));
    }

    prompt
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
