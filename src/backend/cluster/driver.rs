//! Driver script synthesis (`spec.md` §4.5, "Submission").
//!
//! The source makes the driver self-contained by appending its own
//! interpreted source; a compiled-binary ecosystem has no equivalent need
//! (`spec.md` §9, "embedded source shipment"). Instead the driver requires
//! a pre-installed `pjob` binary on the compute node and simply `exec`s
//! `pjob _cluster-run` after mirroring the `PBS_O_*` environment into its
//! final names.

use std::path::Path;

use crate::exec::CommandSpec;

/// Render the driver script body for `command`, pointing it at the same
/// rendezvous the submitter is watching (`--tempdir` is passed so the
/// remote `pjob _cluster-run` adopts it as `existing_temp`).
pub fn render(
    command: &CommandSpec,
    tempdir: &Path,
    out_path: &Path,
    err_path: &Path,
    working_dir: Option<&Path>,
) -> String {
    let mut script = String::new();
    script.push_str("#!/bin/sh\n");
    script.push_str("set -e\n");
    script.push_str("for _pbs_var in $(env | grep '^PBS_O_' | cut -d= -f1); do\n");
    script.push_str("    _pbs_name=$(printf '%s' \"$_pbs_var\" | sed 's/^PBS_O_//')\n");
    script.push_str("    eval \"export $_pbs_name=\\\"\\$$_pbs_var\\\"\"\n");
    script.push_str("done\n\n");

    let mut invocation = vec![
        "exec".to_string(),
        "pjob".to_string(),
        "_cluster-run".to_string(),
        "--tempdir".to_string(),
        shell_quote(&tempdir.display().to_string()),
        "--out".to_string(),
        shell_quote(&out_path.display().to_string()),
        "--err".to_string(),
        shell_quote(&err_path.display().to_string()),
    ];
    if let Some(wd) = working_dir {
        invocation.push("--working-dir".to_string());
        invocation.push(shell_quote(&wd.display().to_string()));
    }
    invocation.push("--".to_string());
    match command {
        CommandSpec::Argv(argv) => {
            invocation.extend(argv.iter().map(|t| shell_quote(t)));
        }
        CommandSpec::Shell(s) => {
            invocation.push("/bin/sh".to_string());
            invocation.push("-c".to_string());
            invocation.push(shell_quote(s));
        }
    }

    script.push_str(&invocation.join(" "));
    script.push('\n');
    script
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn renders_pbs_env_mirror_and_exec_line() {
        let script = render(
            &CommandSpec::Argv(vec!["echo".to_string(), "hi there".to_string()]),
            Path::new("/home/x/tmp"),
            Path::new("/home/x/out"),
            Path::new("/home/x/err"),
            None,
        );
        assert!(script.contains("PBS_O_"));
        assert!(script.contains("exec pjob _cluster-run"));
        assert!(script.contains("'hi there'"));
    }

    #[test]
    fn quotes_embedded_single_quotes() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn working_dir_flag_included_when_set() {
        let script = render(
            &CommandSpec::Shell("ls -la".to_string()),
            Path::new("/home/x/tmp"),
            Path::new("/home/x/out"),
            Path::new("/home/x/err"),
            Some(&PathBuf::from("/home/x/work")),
        );
        assert!(script.contains("--working-dir '/home/x/work'"));
    }
}
