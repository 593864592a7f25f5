//! Preset/Slot Applier (spec §4.12): decides between the fast path (in-place
//! parameter/bypass update, chain stays live) and the slow path (full
//! `replace_all_async` reload, chain goes silent for the duration) when
//! switching to a different [`Session`].

use std::sync::Arc;

use auroute_audio::graph::{GraphError, PluginGraph, ReplaceRequest};
use auroute_audio::session::{PluginSpec, Session, SessionError};
use auroute_plugin::{Plugin, PluginDescriptor, PluginError};

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
}

/// Loads a plugin given its descriptor, used both for the fast-path identity
/// lookup and as the slow-path `replace_all_async` factory.
pub type PluginFactory = dyn Fn(&PluginDescriptor) -> Result<Box<dyn Plugin>, PluginError> + Send + Sync;

/// Whether applying a session can be done in place or needs a full reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyPlan {
    /// Every descriptor at every position matches the live chain's identity;
    /// only bypass flags and state blobs need updating.
    FastPath,
    /// The chain shape differs; everything must be torn down and reloaded.
    SlowPath,
}

/// Compares `session`'s chain identities against the live `graph`'s
/// descriptors, in order, to decide which path spec §4.12 calls for.
///
/// The comparison is by [`PluginDescriptor::identity`] only: display name or
/// manufacturer differences don't force a reload.
#[must_use]
pub fn plan_for(session: &Session, live_descriptors: &[PluginDescriptor]) -> ApplyPlan {
    if session.chain.len() != live_descriptors.len() {
        return ApplyPlan::SlowPath;
    }
    for (entry, live) in session.chain.iter().zip(live_descriptors) {
        let wanted = descriptor_of(&entry.plugin);
        if wanted.identity() != live.identity() {
            return ApplyPlan::SlowPath;
        }
    }
    ApplyPlan::FastPath
}

fn descriptor_of(spec: &PluginSpec) -> PluginDescriptor {
    match spec {
        PluginSpec::Builtin { name, .. } => PluginDescriptor::builtin(name),
        PluginSpec::Vst3 { path, .. } => PluginDescriptor {
            unique_id: path.display().to_string(),
            file_or_identifier: path.display().to_string(),
            name: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            manufacturer: String::new(),
            format_name: "VST3".to_string(),
        },
    }
}

/// Applies `session` to `graph` in place: for each position, restores the
/// bypass flag and, if present, the state blob, without touching the live
/// plugin instance otherwise (spec §4.12 fast path).
///
/// # Errors
/// Returns [`ApplyError::Session`] if a state blob fails to decode, or
/// [`ApplyError::Graph`] if an index is out of range (shouldn't happen once
/// [`plan_for`] has already confirmed [`ApplyPlan::FastPath`]).
pub fn apply_fast_path(graph: &PluginGraph, session: &Session) -> Result<(), ApplyError> {
    let requests = session.to_replace_requests()?;
    for (index, request) in requests.into_iter().enumerate() {
        graph.set_bypassed(index, request.bypassed)?;
        if request.has_state {
            graph.apply_state(index, &request.state_blob)?;
        }
    }
    Ok(())
}

/// Applies `session` to `graph` via a full background reload (spec §4.12
/// slow path). The chain goes silent from the moment this is called until
/// `on_done` fires. `factory` is tried by identity first; callers that need
/// the matching-fallback chain (identity -> file_or_identifier+name ->
/// name-only -> file path) should wrap `factory` themselves, since only the
/// caller knows what alternate descriptors are available to search.
///
/// # Errors
/// Returns [`ApplyError::Session`] if any request fails to build (invalid
/// plugin spec or undecodable state blob).
pub fn apply_slow_path(
    graph: &Arc<PluginGraph>,
    session: &Session,
    factory: Arc<PluginFactory>,
    on_done: impl FnOnce() + Send + 'static,
) -> Result<(), ApplyError> {
    let requests: Vec<ReplaceRequest> = session.to_replace_requests()?;
    graph.replace_all_async(requests, factory, on_done);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn builtin_descriptor(name: &str) -> PluginDescriptor {
        PluginDescriptor::builtin(name)
    }

    #[test]
    fn identical_chain_shape_picks_fast_path() {
        let mut session = Session::new("Test", 48_000, 256);
        session.chain.push(auroute_audio::session::SessionPlugin {
            plugin: PluginSpec::Builtin {
                name: "gain".to_string(),
                parameters: HashMap::new(),
            },
            bypassed: false,
            state_base64: None,
        });
        let live = vec![builtin_descriptor("gain")];
        assert_eq!(plan_for(&session, &live), ApplyPlan::FastPath);
    }

    #[test]
    fn different_plugin_identity_picks_slow_path() {
        let mut session = Session::new("Test", 48_000, 256);
        session.chain.push(auroute_audio::session::SessionPlugin {
            plugin: PluginSpec::Builtin {
                name: "gain".to_string(),
                parameters: HashMap::new(),
            },
            bypassed: false,
            state_base64: None,
        });
        let live = vec![builtin_descriptor("mixer")];
        assert_eq!(plan_for(&session, &live), ApplyPlan::SlowPath);
    }

    #[test]
    fn different_chain_length_picks_slow_path() {
        let session = Session::new("Empty", 48_000, 256);
        let live = vec![builtin_descriptor("gain")];
        assert_eq!(plan_for(&session, &live), ApplyPlan::SlowPath);
    }

    #[test]
    fn empty_chain_matches_empty_live_graph() {
        let session = Session::new("Empty", 48_000, 256);
        assert_eq!(plan_for(&session, &[]), ApplyPlan::FastPath);
    }
}
