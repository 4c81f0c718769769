//! [`DirectoryTransport`] over a live server through the `ldap3` crate.

use std::collections::HashSet;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, LdapResult, Mod, SearchEntry};
use tracing::{debug, info, instrument, warn};

use super::{DirectoryTransport, Replacement, Scope};
use crate::dn::Dn;
use crate::error::{result_code, AppError, AppResult, TransportError, TransportResult};
use crate::filter::Filter;
use crate::models::{Attributes, DirectoryEntry};

pub struct Ldap3Transport {
    ldap: Ldap,
}

impl Ldap3Transport {
    /// Connect to `url` and perform a simple bind.
    #[instrument(skip(password))]
    pub async fn connect(url: &str, bind_dn: &str, password: &str) -> AppResult<Self> {
        let settings = LdapConnSettings::new().set_conn_timeout(std::time::Duration::from_secs(30));
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, url)
            .await
            .map_err(|e| AppError::Transport(connection_error(e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        let result = ldap
            .simple_bind(bind_dn, password)
            .await
            .map_err(|e| AppError::Transport(connection_error(e)))?;
        check(result)?;

        info!(url = %url, bind_dn = %bind_dn, "LDAP connection established");
        Ok(Self { ldap })
    }

    pub async fn unbind(&self) -> AppResult<()> {
        let mut ldap = self.ldap.clone();
        ldap.unbind()
            .await
            .map_err(|e| AppError::Transport(connection_error(e)))
    }
}

fn connection_error(e: LdapError) -> TransportError {
    TransportError::server_down(e.to_string())
}

fn check(result: LdapResult) -> TransportResult<()> {
    if result.rc == result_code::SUCCESS {
        Ok(())
    } else {
        Err(TransportError::new(result.rc, result.text))
    }
}

fn to_entry(entry: SearchEntry) -> TransportResult<DirectoryEntry> {
    let dn = Dn::parse(&entry.dn).map_err(|e| {
        TransportError::new(result_code::INVALID_DN_SYNTAX, e.to_string())
    })?;
    let mut out = DirectoryEntry::new(dn);
    for (name, values) in entry.attrs {
        out.attrs
            .insert(name, values.into_iter().map(String::into_bytes).collect());
    }
    for (name, values) in entry.bin_attrs {
        out.attrs.insert(name, values);
    }
    Ok(out)
}

#[async_trait]
impl DirectoryTransport for Ldap3Transport {
    async fn search(
        &self,
        base: &Dn,
        scope: Scope,
        filter: &Filter,
        attributes: &[String],
    ) -> TransportResult<Vec<DirectoryEntry>> {
        let scope = match scope {
            Scope::Base => ldap3::Scope::Base,
            Scope::OneLevel => ldap3::Scope::OneLevel,
            Scope::Subtree => ldap3::Scope::Subtree,
        };
        let wanted: Vec<&str> = if attributes.is_empty() {
            vec!["*"]
        } else {
            attributes.iter().map(String::as_str).collect()
        };

        let mut ldap = self.ldap.clone();
        let result = ldap
            .search(&base.to_string(), scope, &filter.to_string(), wanted)
            .await
            .map_err(connection_error)?;
        let (entries, status) = (result.0, result.1);
        if status.rc == result_code::NO_SUCH_OBJECT {
            return Err(TransportError::no_such_object(base));
        }
        check(status)?;

        debug!(base = %base, filter = %filter, count = entries.len(), "LDAP search");
        entries
            .into_iter()
            .map(|raw| to_entry(SearchEntry::construct(raw)))
            .collect()
    }

    async fn add(&self, dn: &Dn, attributes: &Attributes) -> TransportResult<()> {
        let attrs: Vec<(Vec<u8>, HashSet<Vec<u8>>)> = attributes
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(name, values)| (name.clone().into_bytes(), values.iter().cloned().collect()))
            .collect();

        let mut ldap = self.ldap.clone();
        let result = ldap.add(&dn.to_string(), attrs).await.map_err(connection_error)?;
        check(result)
    }

    async fn delete(&self, dn: &Dn) -> TransportResult<()> {
        let mut ldap = self.ldap.clone();
        let result = ldap.delete(&dn.to_string()).await.map_err(connection_error)?;
        check(result)
    }

    async fn modify(&self, dn: &Dn, replacements: &[Replacement]) -> TransportResult<()> {
        // Replace with an empty set removes the attribute (RFC 4511 section 4.6).
        let mods: Vec<Mod<Vec<u8>>> = replacements
            .iter()
            .map(|r| {
                let values: HashSet<Vec<u8>> = r.values.iter().flatten().cloned().collect();
                Mod::Replace(r.attribute.clone().into_bytes(), values)
            })
            .collect();

        let mut ldap = self.ldap.clone();
        let result = ldap.modify(&dn.to_string(), mods).await.map_err(connection_error)?;
        check(result)
    }

    async fn move_entry(&self, from: &Dn, to: &Dn) -> TransportResult<()> {
        let rdn = to.rdn().map(|r| r.to_string()).ok_or_else(|| {
            TransportError::new(result_code::INVALID_DN_SYNTAX, "cannot move to the root")
        })?;
        let new_superior = match (from.parent(), to.parent()) {
            (Some(old_parent), Some(new_parent)) if old_parent != new_parent => {
                Some(new_parent.to_string())
            }
            _ => None,
        };

        let mut ldap = self.ldap.clone();
        let result = ldap
            .modifydn(&from.to_string(), &rdn, true, new_superior.as_deref())
            .await
            .map_err(connection_error)?;
        check(result)
    }
}
