//! Command types and the environment variables each of them may declare.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::Error;

/// Environment variables every command may declare.
pub const UNIVERSAL_ENV_VARS: &[&str] = &[
    "MAIL_ACC_PASSWORD",
    "MAIL_ACC_USER",
    "MAIL_RECIPIENTS",
    "JENKINS_USER",
    "JENKINS_PASSWORD",
    "CLOUDERA_HADOOP_ROOT",
    "HADOOP_DEV_DIR",
    "PYTHONPATH",
    "TEST_EXEC_MODE",
    "PYTHON_MODULE_MODE",
    "ENABLE_GOOGLE_DRIVE_INTEGRATION",
    "INSTALL_REQUIREMENTS",
    "RESTART_PROCESS_WHEN_REQUIREMENTS_INSTALLED",
    "DEBUG_ENABLED",
    "OVERRIDE_SCRIPT_BASEDIR",
    "ENABLE_LOGGER_HANDLER_SANITY_CHECK",
    "REMOVE_COMMAND_DATA_FILES",
    "YARNDEVTOOLS_VERSION",
];

const BRANCH_COMPARATOR_ENV_VARS: &[&str] = &[
    "BRANCH_COMP_FEATURE_BRANCH",
    "BRANCH_COMP_MASTER_BRANCH",
    "BRANCH_COMP_REPO_TYPE",
];

const JIRA_UMBRELLA_ENV_VARS: &[&str] = &["UMBRELLA_IDS"];

const GSHEET_SYNC_ENV_VARS: &[&str] = &[
    "GSHEET_CLIENT_SECRET",
    "GSHEET_SPREADSHEET",
    "GSHEET_WORKSHEET",
    "GSHEET_JIRA_COLUMN",
    "GSHEET_UPDATE_DATE_COLUMN",
    "GSHEET_STATUS_INFO_COLUMN",
    "BRANCHES",
];

const UNIT_TEST_RESULT_AGGREGATOR_ENV_VARS: &[&str] = &[
    "GSHEET_CLIENT_SECRET",
    "GSHEET_SPREADSHEET",
    "GSHEET_WORKSHEET",
    "REQUEST_LIMIT",
    "MATCH_EXPRESSION",
    "ABBREV_TC_PACKAGE",
    "AGGREGATE_FILTERS",
    "SKIP_AGGREGATION_RESOURCE_FILE",
    "SKIP_AGGREGATION_RESOURCE_FILE_AUTO_DISCOVERY",
    "GSHEET_COMPARE_WITH_JIRA_TABLE",
];

const UNIT_TEST_RESULT_FETCHER_ENV_VARS: &[&str] = &[
    "BUILD_PROCESSING_LIMIT",
    "FORCE_SENDING_MAIL",
    "RESET_JOB_BUILD_DATA",
];

/// The tool command a job's runs invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    #[display("JIRA_UMBRELLA_DATA_FETCHER")]
    JiraUmbrellaDataFetcher,
    #[display("BRANCH_COMPARATOR")]
    BranchComparator,
    #[display("UNIT_TEST_RESULT_FETCHER")]
    UnitTestResultFetcher,
    #[display("UNIT_TEST_RESULT_AGGREGATOR")]
    UnitTestResultAggregator,
    #[display("UNIT_TEST_RESULT_AGGREGATOR_EMAIL")]
    UnitTestResultAggregatorEmail,
    #[display("UNIT_TEST_RESULT_AGGREGATOR_DB")]
    UnitTestResultAggregatorDb,
    #[display("REVIEW_SHEET_BACKPORT_UPDATER")]
    ReviewSheetBackportUpdater,
    #[display("REVIEWSYNC")]
    Reviewsync,
}

impl CommandType {
    pub const ALL: &'static [CommandType] = &[
        CommandType::JiraUmbrellaDataFetcher,
        CommandType::BranchComparator,
        CommandType::UnitTestResultFetcher,
        CommandType::UnitTestResultAggregator,
        CommandType::UnitTestResultAggregatorEmail,
        CommandType::UnitTestResultAggregatorDb,
        CommandType::ReviewSheetBackportUpdater,
        CommandType::Reviewsync,
    ];

    /// Environment variables specific to this command.
    pub fn env_vars(&self) -> &'static [&'static str] {
        match self {
            CommandType::JiraUmbrellaDataFetcher => JIRA_UMBRELLA_ENV_VARS,
            CommandType::BranchComparator => BRANCH_COMPARATOR_ENV_VARS,
            CommandType::UnitTestResultFetcher => UNIT_TEST_RESULT_FETCHER_ENV_VARS,
            CommandType::UnitTestResultAggregator
            | CommandType::UnitTestResultAggregatorEmail
            | CommandType::UnitTestResultAggregatorDb => UNIT_TEST_RESULT_AGGREGATOR_ENV_VARS,
            CommandType::ReviewSheetBackportUpdater | CommandType::Reviewsync => {
                GSHEET_SYNC_ENV_VARS
            }
        }
    }

    /// Command-specific variables followed by the universal ones.
    pub fn allowed_env_vars(&self) -> Vec<&'static str> {
        let mut allowed: Vec<&'static str> = self.env_vars().to_vec();
        for name in UNIVERSAL_ENV_VARS {
            if !allowed.contains(name) {
                allowed.push(name);
            }
        }
        allowed
    }
}

impl FromStr for CommandType {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_").to_ascii_uppercase();
        CommandType::ALL
            .iter()
            .copied()
            .find(|c| c.to_string() == normalized)
            .ok_or_else(|| Error::invalid_value("command_type", format!("unknown command: {}", s)))
    }
}
