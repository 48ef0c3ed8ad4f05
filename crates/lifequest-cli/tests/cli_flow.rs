use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use lifequest_cli::{run_cli, Cli};
use lifequest_store_sqlite::{QuestApi, SqliteQuestStore};

fn must<T>(result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("test failure: {err:#}"),
    }
}

fn unique_temp_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("lifequest-cli-{}.sqlite3", ulid::Ulid::new()))
}

fn execute_cli(args: &[&str]) -> Result<()> {
    let cli = Cli::try_parse_from(args.iter().copied())?;
    run_cli(cli)
}

#[test]
fn seed_complete_and_inspect_flow() {
    let db_path = unique_temp_db_path();
    let db = db_path.display().to_string();

    must(execute_cli(&["lq", "--db", &db, "migrate"]));
    must(execute_cli(&["lq", "--db", &db, "user", "add", "--username", "alice"]));
    must(execute_cli(&["lq", "--db", &db, "life", "add", "--name", "Boulangerie"]));
    must(execute_cli(&[
        "lq",
        "--db",
        &db,
        "mission",
        "add",
        "--life-id",
        "1",
        "--level-number",
        "1",
        "--title",
        "Premier fournil",
        "--points",
        "45",
    ]));
    must(execute_cli(&[
        "lq",
        "--db",
        &db,
        "mission",
        "add",
        "--life-id",
        "1",
        "--level-number",
        "1",
        "--title",
        "Baguette tradition",
    ]));

    // No progress yet, so the listing reports not-found.
    let before = execute_cli(&["lq", "--db", &db, "mission", "list", "--user-id", "1"]);
    assert!(before.is_err());

    must(execute_cli(&[
        "lq",
        "--db",
        &db,
        "complete",
        "--user-id",
        "1",
        "--mission-id",
        "1",
        "--photo-url",
        "https://example.test/fournil.jpg",
    ]));
    must(execute_cli(&["lq", "--db", &db, "complete", "--user-id", "1", "--mission-id", "2"]));

    let repeat = execute_cli(&["lq", "--db", &db, "complete", "--user-id", "1", "--mission-id", "2"]);
    assert!(repeat.is_err());

    must(execute_cli(&["lq", "--db", &db, "mission", "list", "--user-id", "1"]));
    must(execute_cli(&["lq", "--db", &db, "profile", "--user-id", "1"]));
    must(execute_cli(&["lq", "--db", &db, "rewards", "--user-id", "1"]));
    must(execute_cli(&["lq", "--db", &db, "completions", "--user-id", "1"]));

    let api = QuestApi::new(db_path.clone());
    let profile = must(api.profile(1));
    assert_eq!(profile.xp, 55);
    assert_eq!(profile.level, 2);

    let rewards = must(api.rewards(1));
    assert_eq!(rewards.len(), 1);
    assert_eq!(rewards[0].reward_name, "Récompense: Badge de Boulanger Novice");

    let completions = must(api.completions(1));
    assert_eq!(completions.len(), 2);
    assert_eq!(
        completions[0].user_photo_url.as_deref(),
        Some("https://example.test/fournil.jpg")
    );

    let store = must(SqliteQuestStore::open(&db_path));
    let status = must(store.schema_status());
    assert_eq!(status.current_version, status.target_version);

    drop(store);
    let _ = std::fs::remove_file(&db_path);
}

#[test]
fn unknown_mission_fails_cleanly() {
    let db_path = unique_temp_db_path();
    let db = db_path.display().to_string();

    must(execute_cli(&["lq", "--db", &db, "migrate"]));
    must(execute_cli(&["lq", "--db", &db, "user", "add", "--username", "bob"]));

    let result = execute_cli(&["lq", "--db", &db, "complete", "--user-id", "1", "--mission-id", "99"]);
    let err = match result {
        Ok(()) => panic!("expected unknown mission to fail"),
        Err(err) => err,
    };
    assert!(err.to_string().contains("not found"));

    let _ = std::fs::remove_file(&db_path);
}
