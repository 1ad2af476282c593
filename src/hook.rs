//! C4: the hook bridge — invokes an external executable for the abstract
//! challenge-lifecycle operations (spec §4.4). The concrete mechanism by
//! which a challenge is published is entirely the hook's business; this
//! module only knows how to run it and report its exit status.

use std::io::Write;
use std::process::{Command, Stdio};

use crate::error::{Error, Result};

/// The hook executable plus any static leading arguments (spec §6:
/// "executable path + static leading arguments").
#[derive(Debug, Clone)]
pub struct Hook {
    program: String,
    leading_args: Vec<String>,
}

impl Hook {
    pub fn new(program: impl Into<String>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }

    pub fn setup(&self, domain: &str, token: &str, content: &str) -> Result<()> {
        self.run("setup", &[domain, token, content], None)
    }

    pub fn activate(&self) -> Result<()> {
        self.run("activate", &[], None)
    }

    /// `check` is the one verb whose failure the caller treats as non-fatal
    /// (spec §4.4) — the error is still surfaced here, the Session decides.
    pub fn check(&self, domain: &str, token: &str, content: &str) -> Result<()> {
        self.run("check", &[domain, token, content], None)
    }

    pub fn remove(&self, domain: &str, token: &str, content: &str) -> Result<()> {
        self.run("remove", &[domain, token, content], None)
    }

    pub fn finish(&self) -> Result<()> {
        self.run("finish", &[], None)
    }

    /// `write` receives the certificate chain on stdin; its stdout is the
    /// certificate handed back to the caller.
    pub fn write(&self, csr_path: &str, certificate: &str) -> Result<String> {
        let stdout = self.run_capturing("write", &[csr_path], Some(certificate))?;
        Ok(stdout)
    }

    fn run(&self, verb: &'static str, args: &[&str], stdin_data: Option<&str>) -> Result<()> {
        self.run_capturing(verb, args, stdin_data).map(|_| ())
    }

    fn run_capturing(
        &self,
        verb: &'static str,
        args: &[&str],
        stdin_data: Option<&str>,
    ) -> Result<String> {
        log::info!("running hook `{}` {} {:?}", self.program, verb, args);

        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .arg(verb)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| Error::HookFailed {
            verb,
            message: format!("failed to spawn `{}`: {e}", self.program),
        })?;

        if let Some(data) = stdin_data {
            // stdin is always piped above, so this handle is always present.
            let mut stdin = child.stdin.take().expect("piped stdin");
            stdin.write_all(data.as_bytes()).map_err(|e| Error::HookFailed {
                verb,
                message: format!("failed to write stdin: {e}"),
            })?;
        }
        drop(child.stdin.take());

        let output = child.wait_with_output().map_err(|e| Error::HookFailed {
            verb,
            message: format!("failed to wait for `{}`: {e}", self.program),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::warn!("hook `{verb}` exited with {}: {stderr}", output.status);
            return Err(Error::HookFailed {
                verb,
                message: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &tempfile::TempDir, body: &str) -> String {
        let path = dir.path().join("hook.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn setup_invokes_with_expected_args() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("log.txt");
        let script = write_script(
            &dir,
            &format!("echo \"$@\" > {}", log_path.display()),
        );

        let hook = Hook::new(script, vec![]);
        hook.setup("example.org", "tok", "content").unwrap();

        let logged = fs::read_to_string(&log_path).unwrap();
        assert_eq!(logged.trim(), "setup example.org tok content");
    }

    #[test]
    fn non_zero_exit_is_a_hook_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(&dir, "echo boom 1>&2; exit 1");

        let hook = Hook::new(script, vec![]);
        let err = hook.activate().unwrap_err();
        match err {
            Error::HookFailed { verb, message } => {
                assert_eq!(verb, "activate");
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn write_pipes_certificate_on_stdin_and_returns_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(&dir, "cat");

        let hook = Hook::new(script, vec![]);
        let out = hook.write("csr.pem", "-----BEGIN CERTIFICATE-----").unwrap();
        assert_eq!(out, "-----BEGIN CERTIFICATE-----");
    }
}
