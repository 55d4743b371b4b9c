// src/cli/handlers/commons.rs

// Shared by the handlers that run ad hoc commands rather than catalog steps.

use anyhow::{Context, Result};

use crate::{core::session::Session, models::Target};

/// Binds each stage target in turn and runs `action` on it. The first failure aborts.
pub fn for_each_target<F>(session: &Session, mut action: F) -> Result<()>
where
    F: FnMut(&Session) -> Result<()>,
{
    for target in session.targets() {
        session.bind(target.clone());
        action(session).with_context(|| format!("on {}", target))?;
    }
    Ok(())
}

/// Binds the first stage target: the first host, or the local machine on a local `dev`.
pub fn bind_first_target(session: &Session) -> Target {
    let target = session
        .targets()
        .into_iter()
        .next()
        .unwrap_or(Target::Local);
    session.bind(target.clone());
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::steps::test_support::session_with;
    use crate::system::fake::FakeTransport;
    use std::rc::Rc;

    #[test]
    fn test_for_each_target_stops_at_the_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Rc::new(FakeTransport::new().failing("uptime"));
        let s = session_with(dir.path(), &fake, "hosts: [web2]\n");
        let mut visited = Vec::new();
        let err = for_each_target(&s, |s| {
            visited.push(s.target().to_string());
            s.run("uptime")?;
            Ok(())
        })
        .unwrap_err();
        assert_eq!(visited, vec!["deploy@web1"]);
        assert_eq!(err.to_string(), "on deploy@web1");
    }

    #[test]
    fn test_bind_first_target() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Rc::new(FakeTransport::new());
        let s = session_with(dir.path(), &fake, "hosts: [web2]\n");
        s.bind(Target::Local);
        assert_eq!(bind_first_target(&s).to_string(), "deploy@web1");
        assert_eq!(s.target().to_string(), "deploy@web1");
    }
}
