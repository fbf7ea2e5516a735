//! System prompt construction.
//!
//! The prompt is rebuilt for every inference so the datetime and working
//! directory are current. Tool order follows the catalog, which keeps the
//! prompt deterministic for a given configuration.

use chrono::Local;
use cliz_core::tool::ToolDescriptor;
use std::path::PathBuf;

/// Facts about the machine the agent runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemContext {
    pub os: String,
    pub arch: String,
    pub work_dir: PathBuf,
    pub datetime: String,
}

impl SystemContext {
    /// Capture the current process context.
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            work_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            datetime: Local::now().format("%Y-%m-%d %H:%M:%S %:z").to_string(),
        }
    }
}

/// Render the system prompt.
pub fn system_prompt(
    context: &SystemContext,
    catalog: &[ToolDescriptor],
    respond_language: &str,
) -> String {
    let tools = if catalog.is_empty() {
        "(none configured)".to_string()
    } else {
        catalog
            .iter()
            .map(|t| {
                if t.description.is_empty() {
                    format!("- {}", t.name)
                } else {
                    format!("- {}: {}", t.name, t.description)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You are a helpful assistant that completes the user's tasks with command-line tools.\n\
         Follow these rules strictly:\n\
         \n\
         1. Only the tools listed below can be run. Call `execute_command` to run one.\n\
         2. When unsure how a tool is used, call `get_tool_help` before running it.\n\
         3. Arguments are passed to the program directly, without a shell: no pipes, \
         redirection, globbing or variable expansion.\n\
         4. Combine tools to finish the task efficiently and avoid unnecessary questions.\n\
         5. If the user denies a command, do not retry it; choose another approach or explain.\n\
         \n\
         System context:\n\
         OS: {os}-{arch}\n\
         WorkDir: {work_dir}\n\
         Datetime: {datetime}\n\
         \n\
         Available command-line tools:\n\
         {tools}\n\
         \n\
         Respond in {respond_language}.",
        os = context.os,
        arch = context.arch,
        work_dir = context.work_dir.display(),
        datetime = context.datetime,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> SystemContext {
        SystemContext {
            os: "linux".into(),
            arch: "x86_64".into(),
            work_dir: PathBuf::from("/home/user/project"),
            datetime: "2025-01-01 12:00:00 +00:00".into(),
        }
    }

    #[test]
    fn prompt_lists_tools_in_catalog_order() {
        let catalog = vec![
            ToolDescriptor::new("git", "Version control"),
            ToolDescriptor::new("ls", ""),
        ];
        let prompt = system_prompt(&context(), &catalog, "English");
        let git = prompt.find("- git: Version control").unwrap();
        let ls = prompt.find("- ls\n").unwrap();
        assert!(git < ls);
    }

    #[test]
    fn prompt_carries_context_and_language() {
        let prompt = system_prompt(&context(), &[], "Chinese");
        assert!(prompt.contains("OS: linux-x86_64"));
        assert!(prompt.contains("WorkDir: /home/user/project"));
        assert!(prompt.contains("(none configured)"));
        assert!(prompt.ends_with("Respond in Chinese."));
    }

    #[test]
    fn prompt_is_deterministic() {
        let catalog = vec![ToolDescriptor::new("curl", "HTTP client")];
        assert_eq!(
            system_prompt(&context(), &catalog, "English"),
            system_prompt(&context(), &catalog, "English")
        );
    }
}
