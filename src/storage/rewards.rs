use super::{from_sql_int, lock, parse_timestamp, to_sql_int, SharedConnection};
use crate::error::LedgerError;
use crate::reward::{ExchangeReceipt, NewReward, PointsBalance, RewardId, RewardLedger, RewardRecord};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

const REWARD_COLUMNS: &str =
    "id, round, winner, amount, winning_signature, created_at, claimed, claim_tx_ref";

/// Raw row before integer/timestamp validation
struct RewardRow {
    id: i64,
    round: String,
    winner: String,
    amount: i64,
    winning_signature: String,
    created_at: String,
    claimed: bool,
    claim_tx_ref: Option<String>,
}

impl RewardRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            round: row.get(1)?,
            winner: row.get(2)?,
            amount: row.get(3)?,
            winning_signature: row.get(4)?,
            created_at: row.get(5)?,
            claimed: row.get(6)?,
            claim_tx_ref: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<RewardRecord, LedgerError> {
        Ok(RewardRecord {
            id: self.id,
            round: self.round,
            winner: self.winner,
            amount: from_sql_int(self.amount)?,
            winning_signature: self.winning_signature,
            created_at: parse_timestamp(&self.created_at)?,
            claimed: self.claimed,
            claim_tx_ref: self.claim_tx_ref,
        })
    }
}

/// SQLite reward ledger
///
/// Rewards are keyed by round (UNIQUE), balances by wallet. Claims and
/// exchanges run inside a single transaction each.
pub struct SqliteRewardLedger {
    conn: SharedConnection,
}

impl SqliteRewardLedger {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    fn query_rewards(
        conn: &Connection,
        filter: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<RewardRecord>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM rewards {} ORDER BY created_at DESC, id DESC",
            REWARD_COLUMNS, filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(args, RewardRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RewardRow::into_record).collect()
    }

    fn reward_by_id(conn: &Connection, id: RewardId) -> Result<Option<RewardRecord>, LedgerError> {
        let sql = format!("SELECT {} FROM rewards WHERE id = ?1", REWARD_COLUMNS);
        conn.query_row(&sql, params![id], RewardRow::from_row)
            .optional()?
            .map(RewardRow::into_record)
            .transpose()
    }

    /// Upsert-add points; returns the new balance
    fn add_points(conn: &Connection, wallet: &str, points: u64) -> Result<u64, LedgerError> {
        conn.execute(
            "INSERT INTO points_accounts (wallet, points, tokens, updated_at)
             VALUES (?1, ?2, 0, ?3)
             ON CONFLICT(wallet) DO UPDATE SET
                points = points + excluded.points,
                updated_at = excluded.updated_at",
            params![wallet, to_sql_int(points)?, Utc::now().to_rfc3339()],
        )?;

        let total: i64 = conn.query_row(
            "SELECT points FROM points_accounts WHERE wallet = ?1",
            params![wallet],
            |row| row.get(0),
        )?;
        Ok(from_sql_int(total)?)
    }
}

#[async_trait]
impl RewardLedger for SqliteRewardLedger {
    async fn create_reward(&self, reward: &NewReward) -> Result<RewardId, LedgerError> {
        if reward.amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let conn = lock(&self.conn)?;
        let inserted = conn.execute(
            "INSERT INTO rewards (round, winner, amount, winning_signature, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(round) DO NOTHING",
            params![
                reward.round,
                reward.winner,
                to_sql_int(reward.amount)?,
                reward.winning_signature,
                Utc::now().to_rfc3339()
            ],
        )?;

        let id: RewardId = conn.query_row(
            "SELECT id FROM rewards WHERE round = ?1",
            params![reward.round],
            |row| row.get(0),
        )?;

        if inserted == 1 {
            log::info!("🏆 Reward {} created for round {} → {}", id, reward.round, reward.winner);
        } else {
            log::debug!("Reward for round {} already exists (id {})", reward.round, id);
        }
        Ok(id)
    }

    async fn get_rewards(&self) -> Result<Vec<RewardRecord>, LedgerError> {
        let conn = lock(&self.conn)?;
        Self::query_rewards(&conn, "", &[])
    }

    async fn reward_for_round(&self, round: &str) -> Result<Option<RewardRecord>, LedgerError> {
        let conn = lock(&self.conn)?;
        Ok(Self::query_rewards(&conn, "WHERE round = ?1", &[&round])?
            .into_iter()
            .next())
    }

    async fn rewards_for_wallet(&self, wallet: &str) -> Result<Vec<RewardRecord>, LedgerError> {
        let conn = lock(&self.conn)?;
        Self::query_rewards(&conn, "WHERE winner = ?1", &[&wallet])
    }

    async fn rewards_by_status(&self, claimed: bool) -> Result<Vec<RewardRecord>, LedgerError> {
        let conn = lock(&self.conn)?;
        Self::query_rewards(&conn, "WHERE claimed = ?1", &[&claimed])
    }

    async fn claim_reward(
        &self,
        id: RewardId,
        claim_tx_ref: &str,
    ) -> Result<RewardRecord, LedgerError> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;

        let reward = Self::reward_by_id(&tx, id)?.ok_or(LedgerError::RewardNotFound(id))?;
        if reward.claimed {
            return Err(LedgerError::AlreadyClaimed(id));
        }

        let updated = tx.execute(
            "UPDATE rewards SET claimed = 1, claim_tx_ref = ?2 WHERE id = ?1 AND claimed = 0",
            params![id, claim_tx_ref],
        )?;
        if updated != 1 {
            return Err(LedgerError::AlreadyClaimed(id));
        }

        let new_points = Self::add_points(&tx, &reward.winner, reward.amount)?;
        let claimed = Self::reward_by_id(&tx, id)?.ok_or(LedgerError::RewardNotFound(id))?;
        tx.commit()?;

        log::info!(
            "✅ Reward {} claimed by {} (+{} points, balance {})",
            id,
            claimed.winner,
            claimed.amount,
            new_points
        );
        Ok(claimed)
    }

    async fn credit_points(&self, wallet: &str, points: u64) -> Result<u64, LedgerError> {
        if points == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let conn = lock(&self.conn)?;
        Self::add_points(&conn, wallet, points)
    }

    async fn balance(&self, wallet: &str) -> Result<PointsBalance, LedgerError> {
        let conn = lock(&self.conn)?;
        let row: Option<(i64, i64, String)> = conn
            .query_row(
                "SELECT points, tokens, updated_at FROM points_accounts WHERE wallet = ?1",
                params![wallet],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match row {
            Some((points, tokens, updated_at)) => Ok(PointsBalance {
                wallet: wallet.to_string(),
                points: from_sql_int(points)?,
                tokens: from_sql_int(tokens)?,
                updated_at: Some(parse_timestamp(&updated_at)?),
            }),
            None => Ok(PointsBalance::empty(wallet)),
        }
    }

    async fn exchange(
        &self,
        wallet: &str,
        points_spent: u64,
        tokens_granted: u64,
    ) -> Result<ExchangeReceipt, LedgerError> {
        if points_spent == 0 || tokens_granted == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let spent = to_sql_int(points_spent)?;
        let granted = to_sql_int(tokens_granted)?;

        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;

        let current: Option<(i64, i64)> = tx
            .query_row(
                "SELECT points, tokens FROM points_accounts WHERE wallet = ?1",
                params![wallet],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (previous_points, previous_tokens) =
            current.ok_or_else(|| LedgerError::UnknownWallet(wallet.to_string()))?;
        let previous_points = from_sql_int(previous_points)?;

        // Conditional update is the guard; the read above only feeds the error
        let now = Utc::now().to_rfc3339();
        let updated = tx.execute(
            "UPDATE points_accounts
             SET points = points - ?2, tokens = tokens + ?3, updated_at = ?4
             WHERE wallet = ?1 AND points >= ?2",
            params![wallet, spent, granted, now],
        )?;
        if updated != 1 {
            return Err(LedgerError::InsufficientPoints {
                available: previous_points,
                requested: points_spent,
            });
        }

        let remaining_points = previous_points - points_spent;
        let total_tokens = from_sql_int(previous_tokens)? + tokens_granted;

        tx.execute(
            "INSERT INTO exchange_history
                (wallet, points_spent, tokens_granted, previous_points, new_points, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                wallet,
                spent,
                granted,
                to_sql_int(previous_points)?,
                to_sql_int(remaining_points)?,
                now
            ],
        )?;
        tx.commit()?;

        log::info!(
            "💱 {} exchanged {} points for {} tokens ({} points left)",
            wallet,
            points_spent,
            tokens_granted,
            remaining_points
        );

        Ok(ExchangeReceipt {
            wallet: wallet.to_string(),
            points_spent,
            tokens_granted,
            previous_points,
            remaining_points,
            total_tokens,
        })
    }
}
