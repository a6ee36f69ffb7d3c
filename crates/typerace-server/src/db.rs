use sqlx::{Row, SqlitePool};

use typerace_core::protocol::{RaceLogEntry, RaceResult, RaceSummary};

/// Create all tables if they don't exist.
pub async fn init_db(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS races (
            id INTEGER PRIMARY KEY,
            room_id TEXT NOT NULL,
            race_number INTEGER NOT NULL,
            prompt_length INTEGER NOT NULL,
            campaign_race INTEGER,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS race_results (
            race_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            player_id TEXT NOT NULL,
            name TEXT NOT NULL,
            placement INTEGER,
            wpm INTEGER NOT NULL,
            accuracy REAL NOT NULL,
            characters_typed INTEGER NOT NULL,
            finish_time INTEGER,
            xp_awarded INTEGER NOT NULL,
            PRIMARY KEY (race_id, position),
            FOREIGN KEY (race_id) REFERENCES races(id)
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Record a completed race and its results. Returns the race id.
pub async fn record_race(pool: &SqlitePool, summary: &RaceSummary) -> Result<i64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let race_id = sqlx::query(
        "INSERT INTO races (room_id, race_number, prompt_length, campaign_race)
         VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(&summary.room_id)
    .bind(summary.race_number as i64)
    .bind(summary.prompt_length as i64)
    .bind(summary.campaign_race.map(|n| n as i64))
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    for (position, r) in summary.results.iter().enumerate() {
        sqlx::query(
            "INSERT INTO race_results (race_id, position, player_id, name, placement, wpm, accuracy, characters_typed, finish_time, xp_awarded)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(race_id)
        .bind(position as i64)
        .bind(&r.player_id)
        .bind(&r.name)
        .bind(r.placement.map(|p| p as i64))
        .bind(r.wpm as i64)
        .bind(r.accuracy)
        .bind(r.characters_typed as i64)
        .bind(r.finish_time.map(|t| t as i64))
        .bind(r.xp_awarded as i64)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(race_id)
}

/// Most recent races first, each with its results in standing order.
pub async fn recent_races(pool: &SqlitePool, limit: i64) -> Result<Vec<RaceLogEntry>, sqlx::Error> {
    let races = sqlx::query(
        "SELECT id, room_id, race_number, prompt_length, campaign_race, created_at
         FROM races ORDER BY id DESC LIMIT ?1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(races.len());
    for race in races {
        let race_id: i64 = race.get("id");
        let rows = sqlx::query(
            "SELECT player_id, name, placement, wpm, accuracy, characters_typed, finish_time, xp_awarded
             FROM race_results WHERE race_id = ?1 ORDER BY position",
        )
        .bind(race_id)
        .fetch_all(pool)
        .await?;

        let results = rows
            .into_iter()
            .map(|r| RaceResult {
                player_id: r.get("player_id"),
                name: r.get("name"),
                placement: r.get::<Option<i64>, _>("placement").map(|p| p as u32),
                wpm: r.get::<i64, _>("wpm") as u32,
                accuracy: r.get("accuracy"),
                characters_typed: r.get::<i64, _>("characters_typed") as u32,
                finish_time: r.get::<Option<i64>, _>("finish_time").map(|t| t as u64),
                xp_awarded: r.get::<i64, _>("xp_awarded") as u32,
            })
            .collect();

        entries.push(RaceLogEntry {
            race_id,
            room_id: race.get("room_id"),
            race_number: race.get::<i64, _>("race_number") as u64,
            prompt_length: race.get::<i64, _>("prompt_length") as u32,
            campaign_race: race.get::<Option<i64>, _>("campaign_race").map(|n| n as u32),
            created_at: race.get("created_at"),
            results,
        });
    }

    Ok(entries)
}
