use assert_cmd::cargo::cargo_bin_cmd;

fn help_text(args: &[&str]) -> String {
    let mut cmd = cargo_bin_cmd!("colossusctl");
    let output = cmd
        .args(args)
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    String::from_utf8_lossy(&output).into_owned()
}

#[test]
fn top_level_help_lists_subcommands() {
    let text = help_text(&[]);
    for command in ["logs", "watch", "probe"] {
        assert!(text.contains(command), "help missing '{command}'");
    }
    assert!(text.contains("--account"), "help missing --account");
    assert!(text.contains("--workspace"), "help missing --workspace");
}

#[test]
fn logs_command_is_documented() {
    let text = help_text(&["logs"]);
    assert!(text.contains("--level"), "logs help missing --level");
    assert!(text.contains("--sender"), "logs help missing --sender");
}

#[test]
fn probe_exposes_candidate_tuning() {
    let text = help_text(&["probe"]);
    assert!(text.contains("--candidates"), "probe help missing --candidates");
    assert!(text.contains("--timeout-ms"), "probe help missing --timeout-ms");
}

#[test]
fn missing_account_is_reported() {
    let dir = std::env::temp_dir();
    let mut cmd = cargo_bin_cmd!("colossusctl");
    let output = cmd
        .current_dir(dir)
        .env_remove("COLOSSUS_ACCOUNT")
        .env_remove("COLOSSUS_CONFIG_PATH")
        .env_remove("COLOSSUS_CONFIG_JSON")
        .env("COLOSSUS_TOKEN", "token")
        .args(["probe", "vtex.store-theme@4.x"])
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("COLOSSUS_ACCOUNT"), "unexpected stderr: {text}");
}

#[test]
fn unknown_level_is_rejected() {
    let mut cmd = cargo_bin_cmd!("colossusctl");
    cmd.args(["logs", "--level", "verbose"]).assert().failure();
}
