use std::collections::HashSet;

use crate::auth::JwtService;
use crate::ingest::error::IngestError;
use crate::ingest::types::{ChunkSummary, IngestResult, IngestTarget, IssuedToken};

/// Fold chunk summaries into the upload response.
///
/// `rows` counts every attempted row. For user uploads one token is minted per
/// distinct stored account, so an identity repeated across chunks is counted once.
pub fn aggregate<I>(
    summaries: I,
    target: IngestTarget,
    jwt: &JwtService,
) -> Result<IngestResult, IngestError>
where
    I: IntoIterator<Item = ChunkSummary>,
{
    let mut rows = 0;
    let mut seen = HashSet::new();
    let mut tokens = Vec::new();

    for summary in summaries {
        rows += summary.row_count;
        if target != IngestTarget::Users {
            continue;
        }
        for user in summary.created {
            if !seen.insert(user.id) {
                continue;
            }
            let signed = jwt
                .issue_access_token(&user.username, &user.email, &user.role)
                .map_err(|source| IngestError::Token {
                    username: user.username.clone(),
                    source,
                })?;
            tokens.push(IssuedToken {
                username: user.username,
                email: user.email,
                access_token: signed.token,
            });
        }
    }

    let tokens = match target {
        IngestTarget::Users => Some(tokens),
        IngestTarget::Metrics => None,
    };
    Ok(IngestResult::success(rows, target, tokens))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::tests::make_test_config;
    use crate::ingest::types::UserAccount;

    fn account(id: i32, username: &str) -> UserAccount {
        UserAccount {
            id,
            username: username.into(),
            email: format!("{username}@example.com"),
            role: "user".into(),
        }
    }

    #[test]
    fn sums_rows_and_skips_tokens_for_metrics() {
        let jwt = JwtService::from_config(&make_test_config()).unwrap();
        let summaries = vec![
            ChunkSummary {
                row_count: 200,
                created: Vec::new(),
            },
            ChunkSummary {
                row_count: 13,
                created: Vec::new(),
            },
        ];

        let result = aggregate(summaries, IngestTarget::Metrics, &jwt).unwrap();
        assert_eq!(result.rows, 213);
        assert!(result.tokens.is_none());

        let body = serde_json::to_value(&result).unwrap();
        assert_eq!(body["status"], "success");
        assert_eq!(body["target"], "metrics");
        assert!(body["tokens"].is_null());
    }

    #[test]
    fn deduplicates_accounts_across_chunks() {
        let jwt = JwtService::from_config(&make_test_config()).unwrap();
        let summaries = vec![
            ChunkSummary {
                row_count: 2,
                created: vec![account(1, "alice"), account(2, "bob")],
            },
            ChunkSummary {
                row_count: 1,
                created: vec![account(1, "alice")],
            },
        ];

        let result = aggregate(summaries, IngestTarget::Users, &jwt).unwrap();
        assert_eq!(result.rows, 3);
        let tokens = result.tokens.unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].username, "alice");
        assert_eq!(tokens[1].username, "bob");
    }

    #[test]
    fn empty_user_upload_returns_an_empty_token_list() {
        let jwt = JwtService::from_config(&make_test_config()).unwrap();
        let result = aggregate(Vec::new(), IngestTarget::Users, &jwt).unwrap();
        assert_eq!(result.rows, 0);
        assert_eq!(result.tokens, Some(Vec::new()));
    }
}
