use std::io;

#[derive(Debug)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git failed to execute '{command}'.\n\nstdout:\n{}\nstderr:\n{}", output.stdout, output.stderr)]
    ExecError { command: String, output: GitOutput },

    #[error("'{reference}' not found")]
    RevisionNotFound { reference: String },

    #[error("failed to execute git command")]
    IoError(#[from] io::Error),
}
