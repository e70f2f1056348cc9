// Sync classification registry
//
// Every mutation kind is either sent to the server, kept on this client, or
// produced by the engine itself. The match below is exhaustive on purpose:
// a new `MutationKind` does not compile until it is classified here.

use crate::action::MutationKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncClass {
    /// Applied locally and sent to the server
    Synchronized,
    /// Listening/UI preference, never leaves this client
    LocalOnly,
    /// Produced by the engine (snapshot loads, remote explicit sets)
    Internal,
}

pub fn classify(kind: MutationKind) -> SyncClass {
    match kind {
        MutationKind::ToggleStep
        | MutationKind::SetParameterLock
        | MutationKind::SetTempo
        | MutationKind::SetSwing
        | MutationKind::AddTrack
        | MutationKind::DeleteTrack
        | MutationKind::ClearTrack
        | MutationKind::SetTrackSample
        | MutationKind::SetTrackVolume
        | MutationKind::SetTrackTranspose
        | MutationKind::SetTrackStepCount
        | MutationKind::SetTrackPlaybackMode
        | MutationKind::SetSessionName => SyncClass::Synchronized,
        MutationKind::ToggleMute
        | MutationKind::ToggleSolo
        | MutationKind::ExclusiveSolo
        | MutationKind::ClearSolos
        | MutationKind::SelectStep
        | MutationKind::FocusTrack => SyncClass::LocalOnly,
        MutationKind::LoadState | MutationKind::SetStep | MutationKind::ResetState => {
            SyncClass::Internal
        }
    }
}

pub fn is_synchronized(kind: MutationKind) -> bool {
    classify(kind) == SyncClass::Synchronized
}

fn kinds_in(class: SyncClass) -> Vec<MutationKind> {
    MutationKind::ALL
        .iter()
        .copied()
        .filter(|k| classify(*k) == class)
        .collect()
}

pub fn synchronized_kinds() -> Vec<MutationKind> {
    kinds_in(SyncClass::Synchronized)
}

pub fn local_only_kinds() -> Vec<MutationKind> {
    kinds_in(SyncClass::LocalOnly)
}

pub fn internal_kinds() -> Vec<MutationKind> {
    kinds_in(SyncClass::Internal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_in_exactly_one_class() {
        let total =
            synchronized_kinds().len() + local_only_kinds().len() + internal_kinds().len();
        assert_eq!(total, MutationKind::ALL.len());
        for kind in MutationKind::ALL {
            let memberships = [
                synchronized_kinds().contains(&kind),
                local_only_kinds().contains(&kind),
                internal_kinds().contains(&kind),
            ];
            assert_eq!(
                memberships.iter().filter(|m| **m).count(),
                1,
                "{} classified {} times",
                kind,
                memberships.iter().filter(|m| **m).count()
            );
        }
    }

    #[test]
    fn test_listening_preferences_stay_local() {
        assert_eq!(classify(MutationKind::ToggleMute), SyncClass::LocalOnly);
        assert_eq!(classify(MutationKind::ToggleSolo), SyncClass::LocalOnly);
        assert_eq!(classify(MutationKind::ExclusiveSolo), SyncClass::LocalOnly);
        assert_eq!(classify(MutationKind::ClearSolos), SyncClass::LocalOnly);
    }

    #[test]
    fn test_engine_actions_are_internal() {
        assert_eq!(classify(MutationKind::LoadState), SyncClass::Internal);
        assert_eq!(classify(MutationKind::SetStep), SyncClass::Internal);
        assert!(!is_synchronized(MutationKind::ResetState));
    }

    #[test]
    fn test_synchronized_set() {
        assert_eq!(synchronized_kinds().len(), 13);
        assert!(is_synchronized(MutationKind::ToggleStep));
        assert!(is_synchronized(MutationKind::SetTrackPlaybackMode));
    }
}
