//! read-only netrc lookup feeding the auth precedence chain.

use std::{env, fs, path::PathBuf};

/// parsed netrc machine entries. loaded once at session build from the
/// `NETRC` environment variable, else `~/.netrc`, else `~/_netrc`.
#[derive(Debug, Default, Clone)]
pub(crate) struct Netrc {
    machines: Vec<Machine>,
    default: Option<(String, String)>,
}

#[derive(Debug, Clone)]
struct Machine {
    name: String,
    login: String,
    password: String,
}

impl Netrc {
    pub(crate) fn from_env() -> Option<Self> {
        let path = netrc_path()?;
        let raw = fs::read_to_string(path).ok()?;
        Some(Self::parse(&raw))
    }

    pub(crate) fn parse(raw: &str) -> Self {
        let mut netrc = Self::default();

        let mut tokens = raw.split_whitespace().peekable();
        let mut current: Option<(Option<String>, Option<String>, Option<String>)> = None;

        fn commit(
            netrc: &mut Netrc,
            entry: Option<(Option<String>, Option<String>, Option<String>)>,
        ) {
            if let Some((machine, Some(login), Some(password))) = entry {
                match machine {
                    Some(name) => netrc.machines.push(Machine {
                        name,
                        login,
                        password,
                    }),
                    None => netrc.default = Some((login, password)),
                }
            }
        }

        while let Some(token) = tokens.next() {
            match token {
                "machine" => {
                    commit(&mut netrc, current.take());
                    let name = tokens.next().map(str::to_owned);
                    current = name.map(|n| (Some(n), None, None));
                }
                "default" => {
                    commit(&mut netrc, current.take());
                    current = Some((None, None, None));
                }
                "login" => {
                    if let (Some(entry), Some(value)) = (current.as_mut(), tokens.next()) {
                        entry.1 = Some(value.to_owned());
                    }
                }
                "password" => {
                    if let (Some(entry), Some(value)) = (current.as_mut(), tokens.next()) {
                        entry.2 = Some(value.to_owned());
                    }
                }
                "account" => {
                    let _ = tokens.next();
                }
                // macro definitions run until a blank line; whitespace
                // tokenization already flattened them, so skip tokens until a
                // known keyword shows up again.
                "macdef" => {
                    let _ = tokens.next();
                    while let Some(peek) = tokens.peek() {
                        if matches!(*peek, "machine" | "default" | "login" | "password" | "account") {
                            break;
                        }
                        let _ = tokens.next();
                    }
                }
                _ => {}
            }
        }
        commit(&mut netrc, current);

        netrc
    }

    /// credentials for a host, falling back to the `default` entry.
    pub(crate) fn lookup(&self, host: &str) -> Option<(&str, &str)> {
        self.machines
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(host))
            .map(|m| (m.login.as_str(), m.password.as_str()))
            .or_else(|| {
                self.default
                    .as_ref()
                    .map(|(l, p)| (l.as_str(), p.as_str()))
            })
    }
}

fn netrc_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("NETRC") {
        let path = PathBuf::from(path);
        return path.exists().then_some(path);
    }

    let home = env::var_os("HOME").map(PathBuf::from)?;
    for name in [".netrc", "_netrc"] {
        let path = home.join(name);
        if path.exists() {
            return Some(path);
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_machines() {
        let netrc = Netrc::parse(
            "machine example.test login alice password s3cret\n\
             machine other.test\n  login bob\n  password hunter2\n",
        );

        assert_eq!(netrc.lookup("example.test"), Some(("alice", "s3cret")));
        assert_eq!(netrc.lookup("OTHER.test"), Some(("bob", "hunter2")));
        assert_eq!(netrc.lookup("unknown.test"), None);
    }

    #[test]
    fn parse_default_entry() {
        let netrc = Netrc::parse(
            "machine example.test login alice password a\n\
             default login anon password anon@",
        );

        assert_eq!(netrc.lookup("example.test"), Some(("alice", "a")));
        assert_eq!(netrc.lookup("anything.test"), Some(("anon", "anon@")));
    }

    #[test]
    fn incomplete_entry_ignored() {
        let netrc = Netrc::parse("machine example.test login alice");
        assert_eq!(netrc.lookup("example.test"), None);
    }
}
