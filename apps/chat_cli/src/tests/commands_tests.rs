use super::*;

fn parsed(line: &str) -> CliCommand {
    parse(line).expect("parses")
}

#[test]
fn plain_text_is_a_message() {
    assert_eq!(parsed("  hello there "), CliCommand::Say("hello there".into()));
    assert_eq!(parsed("   "), CliCommand::Empty);
}

#[test]
fn conversation_commands_take_a_user() {
    assert_eq!(parsed("/dm alice"), CliCommand::Direct("alice".into()));
    assert_eq!(parsed("/to  bob "), CliCommand::ToggleRecipient("bob".into()));
    assert!(parse("/dm").is_err());
}

#[test]
fn broadcast_mode_requires_on_or_off() {
    assert_eq!(parsed("/broadcast on"), CliCommand::Broadcast(true));
    assert_eq!(parsed("/broadcast off"), CliCommand::Broadcast(false));
    assert!(parse("/broadcast maybe").is_err());
}

#[test]
fn file_command_splits_path_and_caption() {
    assert_eq!(
        parsed("/file ./cat.png look at this"),
        CliCommand::SendFile {
            path: PathBuf::from("./cat.png"),
            caption: "look at this".into(),
        }
    );
    assert_eq!(
        parsed("/file notes.txt"),
        CliCommand::SendFile {
            path: PathBuf::from("notes.txt"),
            caption: String::new(),
        }
    );
}

#[test]
fn unknown_command_is_reported() {
    let err = parse("/frobnicate").expect_err("unknown");
    assert!(err.to_string().contains("/frobnicate"));
}
