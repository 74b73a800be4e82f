// Assignment of pool addresses to users and fleet-wide invalidation.

use thiserror::Error;
use tracing::error;

use crate::promoter::Promoter;
use crate::store::is_duplicate_key;
use crate::types::UnlockHash;

#[derive(Debug, Error)]
pub enum AssignError {
    #[error("no unused address available in the pool")]
    PoolExhausted,

    #[error("no addresses matched the given server")]
    UnknownServer,

    #[error(transparent)]
    Db(#[from] mongodb::error::Error),
}

impl Promoter {
    /// Returns the primary address of a user, allocating one from the pool
    /// if the user doesn't have one yet. Either way a pool regeneration
    /// check is kicked off in the background.
    pub async fn address_for_user(&self, sub: &str) -> Result<UnlockHash, AssignError> {
        loop {
            if let Some(existing) =
                self.store.primary_address_for_user(sub).await.map_err(|err| {
                    error!(error = %err, "failed to look for existing user address");
                    err
                })?
            {
                return Ok(existing.address);
            }

            // No primary address yet, grab one from the pool.
            let assigned = match self.store.assign_address(sub).await {
                Ok(assigned) => assigned,
                Err(err) if is_duplicate_key(&err) => {
                    // A concurrent request won the primary slot for this
                    // user; the claimed pool entry stays unused. Pick up the
                    // winner's address instead.
                    continue;
                }
                Err(err) => {
                    error!(error = %err, "failed to acquire new address for user");
                    return Err(err.into());
                }
            };

            // Check whether regenerating the pool is necessary in the
            // successful case as well as the exhausted one. The latter
            // should never happen, but generating new addresses is still
            // the way out of it.
            self.spawn_regenerate_pool();

            return match assigned {
                Some(wa) => Ok(wa.address),
                None => Err(AssignError::PoolExhausted),
            };
        }
    }

    /// Marks the primary address of a user as no longer primary. The next
    /// call to [`Promoter::address_for_user`] hands out a fresh one.
    pub async fn set_primary_address_invalid(&self, sub: &str) -> Result<(), AssignError> {
        self.store.set_primary_address_invalid(sub).await?;
        Ok(())
    }

    /// Marks all addresses minted by the given server as dead: unassigned
    /// pool entries are deleted and assigned ones demoted, so affected users
    /// get re-homed on their next address request.
    pub async fn mark_server_dead(&self, server: &str) -> Result<(), AssignError> {
        let (deleted, demoted) = self.store.mark_server_dead(server).await?;
        if deleted == 0 && demoted == 0 {
            return Err(AssignError::UnknownServer);
        }
        Ok(())
    }
}
