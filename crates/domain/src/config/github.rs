use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GitHub (CI-workflow fallback backend)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repo: String,
    /// Environment variable holding the API token.
    #[serde(default = "d_token_env")]
    pub token_env: String,
    /// Workflow file dispatched as the CI fallback.
    #[serde(default = "d_workflow")]
    pub workflow: String,
    /// Git ref the workflow is dispatched on.
    #[serde(default = "d_ref")]
    pub git_ref: String,
    #[serde(default = "d_api_base")]
    pub api_base: String,
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            token_env: d_token_env(),
            workflow: d_workflow(),
            git_ref: d_ref(),
            api_base: d_api_base(),
            timeout_ms: d_timeout_ms(),
        }
    }
}

fn d_token_env() -> String {
    "GITHUB_TOKEN".into()
}
fn d_workflow() -> String {
    "form-sender.yml".into()
}
fn d_ref() -> String {
    "main".into()
}
fn d_api_base() -> String {
    "https://api.github.com".into()
}
fn d_timeout_ms() -> u64 {
    30_000
}
