use crate::{Result, SplitErr, participant::Participant, server::ServerCounterpart};

/// Owns every participant together with its server counterpart.
///
/// Both collections are index-aligned: the `i`-th counterpart always serves the `i`-th
/// participant. This is checked on construction and on every paired access.
pub struct RunContext {
    participants: Vec<Participant>,
    servers: Vec<ServerCounterpart>,
}

impl RunContext {
    /// Creates a new `RunContext`.
    ///
    /// # Returns
    /// `PairingMismatch` if the two collections don't pair up id by id, or if two participants
    /// share an id.
    pub fn new(participants: Vec<Participant>, servers: Vec<ServerCounterpart>) -> Result<Self> {
        if participants.len() != servers.len() {
            let counterpart = format!("{} counterparts", servers.len());
            return Err(SplitErr::PairingMismatch {
                participant: format!("{} participants", participants.len()),
                counterpart,
            });
        }

        for (i, (p, s)) in participants.iter().zip(&servers).enumerate() {
            check_pair(p, s)?;

            if participants[..i].iter().any(|other| other.id() == p.id()) {
                return Err(SplitErr::PairingMismatch {
                    participant: p.id().to_string(),
                    counterpart: "a duplicate id".into(),
                });
            }
        }

        Ok(Self {
            participants,
            servers,
        })
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.participants.iter().map(|p| p.id().to_string()).collect()
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn servers(&self) -> &[ServerCounterpart] {
        &self.servers
    }

    pub(crate) fn participants_mut(&mut self) -> &mut [Participant] {
        &mut self.participants
    }

    pub(crate) fn servers_mut(&mut self) -> &mut [ServerCounterpart] {
        &mut self.servers
    }

    /// The participant at `index`, mutably.
    pub fn participant_mut(&mut self, index: usize) -> Result<&mut Participant> {
        Ok(self.pair_mut(index)?.0)
    }

    /// The counterpart at `index`, mutably.
    pub fn server_mut(&mut self, index: usize) -> Result<&mut ServerCounterpart> {
        Ok(self.pair_mut(index)?.1)
    }

    /// The participant at `index` and its counterpart.
    pub fn pair(&self, index: usize) -> Result<(&Participant, &ServerCounterpart)> {
        let (p, s) = self
            .participants
            .get(index)
            .zip(self.servers.get(index))
            .ok_or_else(|| out_of_range(index))?;

        check_pair(p, s)?;
        Ok((p, s))
    }

    /// The participant at `index` and its counterpart, mutably.
    pub fn pair_mut(&mut self, index: usize) -> Result<(&mut Participant, &mut ServerCounterpart)> {
        let (p, s) = self
            .participants
            .get_mut(index)
            .zip(self.servers.get_mut(index))
            .ok_or_else(|| out_of_range(index))?;

        check_pair(p, s)?;
        Ok((p, s))
    }

    /// Finds a participant's index by id.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.participants.iter().position(|p| p.id() == id)
    }
}

fn check_pair(p: &Participant, s: &ServerCounterpart) -> Result<()> {
    if p.id() != s.id() {
        return Err(SplitErr::PairingMismatch {
            participant: p.id().to_string(),
            counterpart: s.id().to_string(),
        });
    }

    Ok(())
}

fn out_of_range(index: usize) -> SplitErr {
    SplitErr::PairingMismatch {
        participant: format!("index {index}"),
        counterpart: "none".into(),
    }
}
