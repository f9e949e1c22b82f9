/// Postgres connection and schema bootstrap
///
/// Tables and their natural keys:
/// - `turbine_readings`: unique on `(timestamp, turbine_id)`
/// - `daily_summary`: primary key `(turbine_id, date)`
/// - `daily_anomalies`: primary key `(turbine_id, date)`

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::logging::Stage;
use postgres::{Client, NoTls};

pub const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS turbine_readings (
        id              BIGSERIAL PRIMARY KEY,
        timestamp       TIMESTAMP NOT NULL,
        turbine_id      BIGINT NOT NULL,
        wind_speed      DOUBLE PRECISION,
        wind_direction  DOUBLE PRECISION,
        power_output    DOUBLE PRECISION,
        CONSTRAINT uix_timestamp_turbine UNIQUE (timestamp, turbine_id)
    );

    CREATE TABLE IF NOT EXISTS daily_summary (
        turbine_id          BIGINT NOT NULL,
        date                DATE NOT NULL,
        min_power_output    DOUBLE PRECISION,
        max_power_output    DOUBLE PRECISION,
        mean_power_output   DOUBLE PRECISION,
        PRIMARY KEY (turbine_id, date)
    );

    CREATE TABLE IF NOT EXISTS daily_anomalies (
        turbine_id              BIGINT NOT NULL,
        date                    DATE NOT NULL,
        total_power_output      DOUBLE PRECISION NOT NULL,
        hist_mean_daily_output  DOUBLE PRECISION NOT NULL,
        hist_std_daily_output   DOUBLE PRECISION NOT NULL,
        is_anomaly              BOOLEAN NOT NULL,
        PRIMARY KEY (turbine_id, date)
    );
";

pub fn connect(url: &str) -> Result<Client> {
    let client = Client::connect(url, NoTls)?;
    tracing::info!(stage = %Stage::Persist, "connected to database");
    Ok(client)
}

/// Connects using the URL resolved from the environment or config.
pub fn connect_from_config(config: &PipelineConfig) -> Result<Client> {
    connect(&config.database_url()?)
}

/// Creates the three tables if absent. Safe to run on every start.
pub fn create_schema(client: &mut Client) -> Result<()> {
    client.batch_execute(SCHEMA_SQL)?;
    tracing::debug!(stage = %Stage::Persist, "schema ensured");
    Ok(())
}
