//! Parsing of control surface input lines.

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginAction {
    Reload,
    Enable,
    Disable,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCommand {
    Start,
    Stop,
    Restart,
    /// Raw line for the server's input
    Send(String),
    Players,
    Role { name: String, role: String },
    Plugins,
    Plugin { action: PluginAction, name: String },
    PluginInstall { path: PathBuf, overwrite: bool },
    Backup,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  start                          launch the server
  stop                           stop the server
  restart                        stop, then start again
  send <text> | /<text>          write a line to the server console
  players                        show online players
  role <name> <role>             assign a role (Owner, Admin, VIP, Player)
  plugins                        list installed plugins
  plugin reload|enable|disable|remove <name>
  plugin install <path> [--force]
  backup                         archive the world folder
  status                         show server state
  help                           show this help
  quit                           stop the server and exit";

/// Parses one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<SurfaceCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if let Some(raw) = line.strip_prefix('/') {
        return non_empty(raw, "send").map(|text| Some(SurfaceCommand::Send(text)));
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_lowercase().as_str() {
        "start" => SurfaceCommand::Start,
        "stop" => SurfaceCommand::Stop,
        "restart" => SurfaceCommand::Restart,
        "send" => SurfaceCommand::Send(non_empty(rest, "send")?),
        "players" | "list" => SurfaceCommand::Players,
        "role" => {
            let mut parts = rest.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(name), Some(role), None) => SurfaceCommand::Role {
                    name: name.to_string(),
                    role: role.to_string(),
                },
                _ => return Err("usage: role <name> <role>".to_string()),
            }
        }
        "plugins" => SurfaceCommand::Plugins,
        "plugin" => parse_plugin(rest)?,
        "backup" => SurfaceCommand::Backup,
        "status" => SurfaceCommand::Status,
        "help" | "?" => SurfaceCommand::Help,
        "quit" | "exit" => SurfaceCommand::Quit,
        other => return Err(format!("unknown command '{}', try 'help'", other)),
    };
    Ok(Some(command))
}

fn parse_plugin(rest: &str) -> Result<SurfaceCommand, String> {
    let (action, target) = match rest.split_once(char::is_whitespace) {
        Some((action, target)) => (action, target.trim()),
        None => (rest, ""),
    };

    let action = match action.to_lowercase().as_str() {
        "reload" => PluginAction::Reload,
        "enable" => PluginAction::Enable,
        "disable" => PluginAction::Disable,
        "remove" => PluginAction::Remove,
        "install" => {
            let (path, overwrite) = match target.strip_suffix("--force") {
                Some(path) => (path.trim(), true),
                None => (target, false),
            };
            return Ok(SurfaceCommand::PluginInstall {
                path: PathBuf::from(non_empty(path, "plugin install")?),
                overwrite,
            });
        }
        _ => return Err("usage: plugin reload|enable|disable|remove <name> | plugin install <path> [--force]".to_string()),
    };

    Ok(SurfaceCommand::Plugin {
        action,
        name: non_empty(target, "plugin")?,
    })
}

fn non_empty(text: &str, command: &str) -> Result<String, String> {
    let text = text.trim();
    if text.is_empty() {
        Err(format!("{} needs an argument", command))
    } else {
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_command("start"), Ok(Some(SurfaceCommand::Start)));
        assert_eq!(parse_command("  STOP "), Ok(Some(SurfaceCommand::Stop)));
        assert_eq!(parse_command("quit"), Ok(Some(SurfaceCommand::Quit)));
        assert_eq!(parse_command(""), Ok(None));
    }

    #[test]
    fn test_send_forms() {
        assert_eq!(
            parse_command("send say hello world"),
            Ok(Some(SurfaceCommand::Send("say hello world".to_string())))
        );
        assert_eq!(
            parse_command("/time set day"),
            Ok(Some(SurfaceCommand::Send("time set day".to_string())))
        );
        assert!(parse_command("send").is_err());
        assert!(parse_command("/").is_err());
    }

    #[test]
    fn test_role_command() {
        assert_eq!(
            parse_command("role Alex Admin"),
            Ok(Some(SurfaceCommand::Role {
                name: "Alex".to_string(),
                role: "Admin".to_string()
            }))
        );
        assert!(parse_command("role Alex").is_err());
        assert!(parse_command("role Alex Admin extra").is_err());
    }

    #[test]
    fn test_plugin_commands() {
        assert_eq!(
            parse_command("plugin reload Essentials.jar"),
            Ok(Some(SurfaceCommand::Plugin {
                action: PluginAction::Reload,
                name: "Essentials.jar".to_string()
            }))
        );
        assert_eq!(
            parse_command("plugin install /tmp/My Plugin.jar --force"),
            Ok(Some(SurfaceCommand::PluginInstall {
                path: PathBuf::from("/tmp/My Plugin.jar"),
                overwrite: true
            }))
        );
        assert!(parse_command("plugin frobnicate x").is_err());
        assert!(parse_command("plugin disable").is_err());
    }

    #[test]
    fn test_unknown_command() {
        assert!(parse_command("dance").unwrap_err().contains("unknown command"));
    }
}
