use tracing::warn;

use conduit_core::{NewUser, IMPORTED_PASSWORD_HASH};

use super::fields::text;
use super::{BatchAccumulator, ErrorKind, ImportRun};
use crate::decode::{Record, RecordDecoder};
use crate::error::IngestError;
use crate::store::ImportStore;

/// Users are batched and upserted on email. Records without an email or an
/// external id are dropped silently, as are later duplicates of an email
/// within the same batch.
pub(super) async fn import(
    store: &dyn ImportStore,
    decoder: &mut RecordDecoder,
    run: &mut ImportRun<'_>,
) -> Result<(), IngestError> {
    let mut batch = BatchAccumulator::new(run.settings.batch_size);

    while let Some(record) = run.next_record(decoder).await? {
        let Some(user) = map_user(&record) else {
            continue;
        };
        let email = user.email.clone();
        batch.push_unique(&email, user);
        if batch.is_full() {
            flush(store, &mut batch, run).await;
        }
    }
    flush(store, &mut batch, run).await;
    Ok(())
}

fn map_user(record: &Record) -> Option<NewUser> {
    let external_id = text(record, &["id", "uuid"])?;
    let email = text(record, &["email"])?;
    Some(NewUser {
        external_id,
        email,
        username: text(record, &["username", "name"]).unwrap_or_default(),
        password_hash: IMPORTED_PASSWORD_HASH.to_string(),
    })
}

async fn flush(store: &dyn ImportStore, batch: &mut BatchAccumulator<NewUser>, run: &mut ImportRun<'_>) {
    let users = batch.flush();
    let Some(last) = users.last() else {
        return;
    };
    let rows = users.len() as u64;
    match store.upsert_users(&users).await {
        Ok(_) => run.succeeded(rows),
        Err(e) => {
            warn!(rows, error = %e, "user batch failed");
            run.fail_rows(
                ErrorKind::Batch,
                &last.external_id,
                &format!("user batch of {rows} failed: {e}"),
                rows,
            );
        }
    }
    run.report().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn aliases_and_required_fields() {
        let r = json!({"uuid": "u1", "email": " a@x.com ", "name": "alice"});
        let user = map_user(r.as_object().unwrap()).unwrap();
        assert_eq!(user.external_id, "u1");
        assert_eq!(user.email, "a@x.com");
        assert_eq!(user.username, "alice");
        assert_eq!(user.password_hash, IMPORTED_PASSWORD_HASH);

        let no_email = json!({"id": "u1", "username": "alice"});
        assert!(map_user(no_email.as_object().unwrap()).is_none());
        let no_id = json!({"email": "a@x.com"});
        assert!(map_user(no_id.as_object().unwrap()).is_none());
    }
}
