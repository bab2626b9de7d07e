//! Scripted CLI runner for testing provider clients without the vendor CLIs.

use crate::error::{Error, Result};
use crate::providers::CloudCli;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

enum Scripted {
    Output(String),
    Failure(Error),
}

struct Script {
    matcher: String,
    response: Scripted,
}

/// Mock CLI runner returning canned responses keyed by command substring.
///
/// The first script whose matcher is contained in the rendered command line
/// wins, so more specific matchers should be registered first. Every executed
/// command line is recorded for assertions.
pub struct ScriptedCli {
    scripts: Arc<Mutex<Vec<Script>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Default for ScriptedCli {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCli {
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Respond with stdout when the command line contains the matcher
    pub fn respond(&self, matcher: &str, stdout: &str) {
        self.scripts.lock().unwrap().push(Script {
            matcher: matcher.to_string(),
            response: Scripted::Output(stdout.to_string()),
        });
    }

    /// Fail with the error when the command line contains the matcher
    pub fn fail(&self, matcher: &str, error: Error) {
        self.scripts.lock().unwrap().push(Script {
            matcher: matcher.to_string(),
            response: Scripted::Failure(error),
        });
    }

    /// Every command line executed so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of executed commands containing the matcher
    pub fn call_count(&self, matcher: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.contains(matcher))
            .count()
    }
}

#[async_trait]
impl CloudCli for ScriptedCli {
    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        let line = format!("{} {}", program, args.join(" "));
        self.calls.lock().unwrap().push(line.clone());

        let scripts = self.scripts.lock().unwrap();
        for script in scripts.iter() {
            if line.contains(&script.matcher) {
                return match &script.response {
                    Scripted::Output(stdout) => Ok(stdout.clone()),
                    Scripted::Failure(error) => Err(error.clone()),
                };
            }
        }
        Err(Error::internal(format!(
            "no scripted response for command: {}",
            line
        )))
    }
}
