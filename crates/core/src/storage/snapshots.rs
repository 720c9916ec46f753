use crate::domain::snapshot::{
    Availability, FixtureRecord, PlayerRecord, Position, Snapshot, TeamRecord,
};
use crate::domain::GenerationId;
use anyhow::Context;
use chrono::{DateTime, Utc};

const INSERT_BATCH: usize = 200;

/// Writes one generation in a single transaction. Child rows for the generation are deleted
/// first, so committing the same generation twice leaves exactly one copy. The published
/// generation is refused.
pub async fn commit_snapshot(pool: &sqlx::PgPool, snapshot: &Snapshot) -> anyhow::Result<()> {
    let g = snapshot.generation;
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let published = sqlx::query_as::<_, (i32,)>(
        "SELECT 1 FROM published_artifact \
         WHERE slot = 1 AND gameweek = $1 AND stamped_at = $2",
    )
    .persistent(false)
    .bind(g.gameweek)
    .bind(g.stamped_at)
    .fetch_optional(&mut *tx)
    .await
    .context("select published_artifact failed")?;
    anyhow::ensure!(
        published.is_none(),
        "snapshot {g} is published and cannot be overwritten"
    );

    sqlx::query(
        "INSERT INTO snapshots (gameweek, stamped_at, committed_at, team_count, player_count, fixture_count) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (gameweek, stamped_at) DO UPDATE \
           SET committed_at = EXCLUDED.committed_at, team_count = EXCLUDED.team_count, \
               player_count = EXCLUDED.player_count, fixture_count = EXCLUDED.fixture_count",
    )
    .persistent(false)
    .bind(g.gameweek)
    .bind(g.stamped_at)
    .bind(Utc::now())
    .bind(snapshot.teams.len() as i32)
    .bind(snapshot.players.len() as i32)
    .bind(snapshot.fixtures.len() as i32)
    .execute(&mut *tx)
    .await
    .context("upsert snapshots failed")?;

    for table in ["snapshot_teams", "snapshot_players", "snapshot_fixtures"] {
        sqlx::query(&format!(
            "DELETE FROM {table} WHERE gameweek = $1 AND stamped_at = $2"
        ))
        .persistent(false)
        .bind(g.gameweek)
        .bind(g.stamped_at)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("clear {table} failed"))?;
    }

    for chunk in snapshot.teams.chunks(INSERT_BATCH) {
        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO snapshot_teams (gameweek, stamped_at, team_id, name, short_name, strength) ",
        );
        qb.push_values(chunk, |mut b, t| {
            b.push_bind(g.gameweek)
                .push_bind(g.stamped_at)
                .push_bind(t.id)
                .push_bind(&t.name)
                .push_bind(&t.short_name)
                .push_bind(t.strength);
        });
        qb.build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .context("insert snapshot_teams failed")?;
    }

    let mut batch_idx: usize = 0;
    for chunk in snapshot.players.chunks(INSERT_BATCH) {
        batch_idx += 1;
        let t0 = std::time::Instant::now();
        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO snapshot_players (gameweek, stamped_at, player_id, name, team_id, element_type, form, \
             total_points, points_per_game, expected_points, now_cost, selected_by_percent, status, chance_of_playing) ",
        );
        qb.push_values(chunk, |mut b, p| {
            b.push_bind(g.gameweek)
                .push_bind(g.stamped_at)
                .push_bind(p.id)
                .push_bind(&p.name)
                .push_bind(p.team_id)
                .push_bind(p.position.element_type())
                .push_bind(p.form)
                .push_bind(p.total_points)
                .push_bind(p.points_per_game)
                .push_bind(p.expected_points)
                .push_bind(p.now_cost)
                .push_bind(p.selected_by_percent)
                .push_bind(p.status.code())
                .push_bind(p.chance_of_playing);
        });
        qb.build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .context("insert snapshot_players failed")?;

        tracing::debug!(
            generation = %g,
            batch_idx,
            batch_size = chunk.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "snapshot_players batch insert"
        );
    }

    for chunk in snapshot.fixtures.chunks(INSERT_BATCH) {
        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO snapshot_fixtures (gameweek, stamped_at, fixture_id, event, team_h, team_a, kickoff_time, \
             team_h_difficulty, team_a_difficulty, finished) ",
        );
        qb.push_values(chunk, |mut b, f| {
            b.push_bind(g.gameweek)
                .push_bind(g.stamped_at)
                .push_bind(f.id)
                .push_bind(f.gameweek)
                .push_bind(f.home_team_id)
                .push_bind(f.away_team_id)
                .push_bind(f.kickoff_time)
                .push_bind(f.home_difficulty)
                .push_bind(f.away_difficulty)
                .push_bind(f.finished);
        });
        qb.build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .context("insert snapshot_fixtures failed")?;
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(())
}

pub async fn latest_generation(pool: &sqlx::PgPool) -> anyhow::Result<Option<GenerationId>> {
    let row = sqlx::query_as::<_, (i32, DateTime<Utc>)>(
        "SELECT gameweek, stamped_at FROM snapshots \
         ORDER BY gameweek DESC, stamped_at DESC \
         LIMIT 1",
    )
    .persistent(false)
    .fetch_optional(pool)
    .await
    .context("select latest snapshot failed")?;

    Ok(row.map(|(gameweek, stamped_at)| GenerationId::new(gameweek, stamped_at)))
}

type PlayerRow = (
    i32,
    String,
    i32,
    i32,
    f64,
    i32,
    f64,
    Option<f64>,
    i32,
    f64,
    String,
    Option<i32>,
);

type FixtureRow = (
    i32,
    Option<i32>,
    i32,
    i32,
    Option<DateTime<Utc>>,
    i32,
    i32,
    bool,
);

pub async fn load_snapshot(
    pool: &sqlx::PgPool,
    generation: GenerationId,
) -> anyhow::Result<Option<Snapshot>> {
    let g = generation;
    let exists = sqlx::query_scalar::<_, i32>(
        "SELECT player_count FROM snapshots WHERE gameweek = $1 AND stamped_at = $2",
    )
    .persistent(false)
    .bind(g.gameweek)
    .bind(g.stamped_at)
    .fetch_optional(pool)
    .await
    .context("select snapshots failed")?;

    if exists.is_none() {
        return Ok(None);
    }

    let teams = sqlx::query_as::<_, (i32, String, String, i32)>(
        "SELECT team_id, name, short_name, strength FROM snapshot_teams \
         WHERE gameweek = $1 AND stamped_at = $2 ORDER BY team_id",
    )
    .persistent(false)
    .bind(g.gameweek)
    .bind(g.stamped_at)
    .fetch_all(pool)
    .await
    .context("select snapshot_teams failed")?
    .into_iter()
    .map(|(id, name, short_name, strength)| TeamRecord {
        id,
        name,
        short_name,
        strength,
    });

    let player_rows = sqlx::query_as::<_, PlayerRow>(
        "SELECT player_id, name, team_id, element_type, form, total_points, points_per_game, \
                expected_points, now_cost, selected_by_percent, status, chance_of_playing \
         FROM snapshot_players WHERE gameweek = $1 AND stamped_at = $2 ORDER BY player_id",
    )
    .persistent(false)
    .bind(g.gameweek)
    .bind(g.stamped_at)
    .fetch_all(pool)
    .await
    .context("select snapshot_players failed")?;

    let mut players = Vec::with_capacity(player_rows.len());
    for row in player_rows {
        players.push(player_from_row(row)?);
    }

    let fixtures = sqlx::query_as::<_, FixtureRow>(
        "SELECT fixture_id, event, team_h, team_a, kickoff_time, team_h_difficulty, team_a_difficulty, finished \
         FROM snapshot_fixtures WHERE gameweek = $1 AND stamped_at = $2 ORDER BY fixture_id",
    )
    .persistent(false)
    .bind(g.gameweek)
    .bind(g.stamped_at)
    .fetch_all(pool)
    .await
    .context("select snapshot_fixtures failed")?
    .into_iter()
    .map(
        |(id, event, team_h, team_a, kickoff_time, h_diff, a_diff, finished)| FixtureRecord {
            id,
            gameweek: event,
            home_team_id: team_h,
            away_team_id: team_a,
            kickoff_time,
            home_difficulty: h_diff,
            away_difficulty: a_diff,
            finished,
        },
    );

    Ok(Some(Snapshot::new(g, teams, players, fixtures)))
}

fn player_from_row(row: PlayerRow) -> anyhow::Result<PlayerRecord> {
    let (
        id,
        name,
        team_id,
        element_type,
        form,
        total_points,
        points_per_game,
        expected_points,
        now_cost,
        selected_by_percent,
        status,
        chance_of_playing,
    ) = row;

    let position = Position::from_element_type(element_type)
        .with_context(|| format!("invalid element_type {element_type} for player {id}"))?;
    let status = Availability::from_code(&status)
        .with_context(|| format!("invalid status {status:?} for player {id}"))?;

    Ok(PlayerRecord {
        id,
        name,
        team_id,
        position,
        form,
        total_points,
        points_per_game,
        expected_points,
        now_cost,
        selected_by_percent,
        status,
        chance_of_playing,
    })
}
