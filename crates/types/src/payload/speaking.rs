use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use twilight_model::id::{Id, marker::UserMarker};

bitflags! {
    /// Flags describing how a user is transmitting audio.
    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    pub struct SpeakingFlags: u8 {
        /// Normal voice transmission.
        const MICROPHONE = 1 << 0;
        /// Context audio for video, no speaking indicator.
        const SOUNDSHARE = 1 << 1;
        /// Priority speaker, lowering the volume of other speakers.
        const PRIORITY = 1 << 2;
    }
}

impl Serialize for SpeakingFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}

impl<'de> Deserialize<'de> for SpeakingFlags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u8::deserialize(deserializer)?;
        Ok(Self::from_bits_truncate(bits))
    }
}

/// Another user's speaking state, received from the voice gateway.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Speaking {
    /// Synchronization source of the speaking user, needed to associate
    /// incoming packets with them.
    pub ssrc: u32,
    pub speaking: SpeakingFlags,
    #[serde(default)]
    pub user_id: Option<Id<UserMarker>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flags_roundtrip_over_the_wire() {
        let flags = SpeakingFlags::MICROPHONE | SpeakingFlags::PRIORITY;
        assert_eq!(serde_json::to_value(flags).unwrap(), json!(5));

        let parsed: SpeakingFlags = serde_json::from_value(json!(5)).unwrap();
        assert_eq!(parsed, flags);
    }

    #[test]
    fn unknown_bits_are_dropped() {
        let parsed: SpeakingFlags = serde_json::from_value(json!(0b1000_0001)).unwrap();
        assert_eq!(parsed, SpeakingFlags::MICROPHONE);
    }

    #[test]
    fn speaking_event() {
        let value = json!({"ssrc": 9, "speaking": 1, "user_id": "42"});
        let speaking: Speaking = serde_json::from_value(value).unwrap();

        assert_eq!(speaking.ssrc, 9);
        assert_eq!(speaking.speaking, SpeakingFlags::MICROPHONE);
        assert_eq!(speaking.user_id, Some(Id::new(42)));
    }
}
