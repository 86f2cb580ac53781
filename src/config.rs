use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "planilla")]
#[command(about = "Match-day cash register and provider affectation ledger")]
pub struct PlanillaConfig {
    /// Path to the SQLite ledger database
    #[arg(long, env = "PLANILLA_DB_PATH", default_value = "planilla.db")]
    pub db_path: String,

    /// Address the HTTP API binds to
    #[arg(long, env = "PLANILLA_BIND", default_value = "0.0.0.0:3000")]
    pub bind: String,

    /// Refuse to post a register that was never closed
    #[arg(long, env = "PLANILLA_REQUIRE_CLOSE_BEFORE_POST", default_value = "false")]
    pub require_close_before_post: bool,
}

impl Default for PlanillaConfig {
    fn default() -> Self {
        Self {
            db_path: "planilla.db".to_string(),
            bind: "0.0.0.0:3000".to_string(),
            require_close_before_post: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let cfg = PlanillaConfig::parse_from([
            "planilla",
            "--db-path",
            "/tmp/ledger.db",
            "--require-close-before-post",
        ]);
        assert_eq!(cfg.db_path, "/tmp/ledger.db");
        assert!(cfg.require_close_before_post);
    }
}
