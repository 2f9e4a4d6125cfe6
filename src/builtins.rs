use crate::environ::Environ;
use crate::error::{
    Result, ShellError, ERROR_CD_ARG, ERROR_CD_NOHOME, ERROR_EXIT_ARG, ERROR_GETENV_ARG,
    ERROR_PWD_ARG, ERROR_SETENV_ARG, ERROR_UNSETENV_ARG,
};
use std::io::Write;

/// Commands the shell runs itself instead of exec'ing a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Cd,
    Pwd,
    Setenv,
    Getenv,
    Unsetenv,
    Exit,
}

/// What the read loop should do after a builtin returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinStatus {
    Continue,
    Exit,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Builtin> {
        match name {
            "cd" => Some(Builtin::Cd),
            "pwd" => Some(Builtin::Pwd),
            "setenv" => Some(Builtin::Setenv),
            "getenv" => Some(Builtin::Getenv),
            "unsetenv" => Some(Builtin::Unsetenv),
            "exit" => Some(Builtin::Exit),
            _ => None,
        }
    }

    /// Runs the builtin. `argv[0]` is the builtin's own name.
    /// Output goes to `out` so a forked stage can write into its redirected stdout.
    pub fn run(self, argv: &[String], env: &mut Environ, out: &mut dyn Write) -> Result<BuiltinStatus> {
        let args = argv.get(1..).unwrap_or(&[]);
        match self {
            Builtin::Cd => cd(args, env)?,
            Builtin::Pwd => {
                if !args.is_empty() {
                    return Err(ShellError::Usage(ERROR_PWD_ARG));
                }
                match env.get("PWD") {
                    Some(pwd) => writeln!(out, "{}", pwd)?,
                    None => writeln!(out, "{}", std::env::current_dir()?.display())?,
                }
            }
            Builtin::Setenv => match args {
                [name, value] => env.set(name, value),
                _ => return Err(ShellError::Usage(ERROR_SETENV_ARG)),
            },
            Builtin::Getenv => match args {
                [] => {
                    for (name, value) in env.iter() {
                        writeln!(out, "{}={}", name, value)?;
                    }
                }
                [name] => match env.get(name) {
                    Some(value) => writeln!(out, "{}", value)?,
                    None => return Err(ShellError::UnknownVariable(name.clone())),
                },
                _ => return Err(ShellError::Usage(ERROR_GETENV_ARG)),
            },
            Builtin::Unsetenv => match args {
                [name] => {
                    if env.contains(name) {
                        env.remove(name);
                    }
                }
                _ => return Err(ShellError::Usage(ERROR_UNSETENV_ARG)),
            },
            Builtin::Exit => {
                if !args.is_empty() {
                    return Err(ShellError::Usage(ERROR_EXIT_ARG));
                }
                return Ok(BuiltinStatus::Exit);
            }
        }
        out.flush()?;
        Ok(BuiltinStatus::Continue)
    }
}

fn cd(args: &[String], env: &mut Environ) -> Result<()> {
    let target = match args {
        [] => match env.get("HOME") {
            Some(home) => home.to_string(),
            None => return Err(ShellError::Usage(ERROR_CD_NOHOME)),
        },
        [dir] => dir.clone(),
        _ => return Err(ShellError::Usage(ERROR_CD_ARG)),
    };
    std::env::set_current_dir(&target)?;
    let cwd = std::env::current_dir()?;
    env.set("PWD", &cwd.to_string_lossy());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn run(words: &[&str], env: &mut Environ) -> (Result<BuiltinStatus>, String) {
        let builtin = Builtin::from_name(words[0]).unwrap();
        let mut out = Vec::new();
        let status = builtin.run(&argv(words), env, &mut out);
        (status, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Builtin::from_name("getenv"), Some(Builtin::Getenv));
        assert_eq!(Builtin::from_name("exit"), Some(Builtin::Exit));
        assert_eq!(Builtin::from_name("ls"), None);
    }

    #[test]
    fn test_setenv_getenv_unsetenv() {
        let mut env = Environ::default();
        let (status, _) = run(&["setenv", "COLOR", "blue"], &mut env);
        assert_eq!(status.unwrap(), BuiltinStatus::Continue);

        let (_, out) = run(&["getenv", "COLOR"], &mut env);
        assert_eq!(out, "blue\n");

        let (_, out) = run(&["getenv"], &mut env);
        assert_eq!(out, "COLOR=blue\n");

        run(&["unsetenv", "COLOR"], &mut env).0.unwrap();
        let (status, _) = run(&["getenv", "COLOR"], &mut env);
        assert!(matches!(status, Err(ShellError::UnknownVariable(ref n)) if n == "COLOR"));
    }

    #[test]
    fn test_argument_counts() {
        let mut env = Environ::default();
        let (status, _) = run(&["setenv", "ONLY"], &mut env);
        assert!(matches!(status, Err(ShellError::Usage(ERROR_SETENV_ARG))));
        let (status, _) = run(&["unsetenv"], &mut env);
        assert!(matches!(status, Err(ShellError::Usage(ERROR_UNSETENV_ARG))));
        let (status, _) = run(&["getenv", "A", "B"], &mut env);
        assert!(matches!(status, Err(ShellError::Usage(ERROR_GETENV_ARG))));
        let (status, _) = run(&["pwd", "extra"], &mut env);
        assert!(matches!(status, Err(ShellError::Usage(ERROR_PWD_ARG))));
        let (status, _) = run(&["cd", "a", "b"], &mut env);
        assert!(matches!(status, Err(ShellError::Usage(ERROR_CD_ARG))));
        let (status, _) = run(&["cd"], &mut env);
        assert!(matches!(status, Err(ShellError::Usage(ERROR_CD_NOHOME))));
    }

    #[test]
    fn test_exit() {
        let mut env = Environ::default();
        assert_eq!(run(&["exit"], &mut env).0.unwrap(), BuiltinStatus::Exit);
        assert!(run(&["exit", "1"], &mut env).0.is_err());
    }

    #[test]
    fn test_pwd_prefers_store() {
        let mut env = Environ::default();
        env.set("PWD", "/somewhere");
        let (_, out) = run(&["pwd"], &mut env);
        assert_eq!(out, "/somewhere\n");
    }
}
