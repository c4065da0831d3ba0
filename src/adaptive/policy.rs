//! Link quality classification over closed telemetry slices

use crate::config::AdaptiveConfig;
use crate::telemetry::{RuntimeInfoStore, SLICE_COUNT, TimeSlice};
use crate::types::Millis;

/// How one closed slice bears on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceVerdict {
    Bad,
    Good,
    Neutral,
}

/// Classify a closed slice.
///
/// Degradation needs one bad signal; a good verdict needs every signal to be clean,
/// which is what makes raising harder than lowering.
pub fn classify(slice: &TimeSlice, config: &AdaptiveConfig) -> SliceVerdict {
    let loss = slice.loss_percent();
    let dbm = slice.best_antenna_dbm();
    let skipped = slice.blocks.skipped_blocks > 0;

    if skipped
        || loss.is_some_and(|loss| loss >= config.lower_loss_percent)
        || dbm.is_some_and(|dbm| dbm < config.lower_dbm)
    {
        return SliceVerdict::Bad;
    }

    let clean_loss = loss.is_some_and(|loss| loss <= config.raise_loss_percent);
    let strong = dbm.is_none_or(|dbm| dbm >= config.raise_dbm);
    if clean_loss && strong { SliceVerdict::Good } else { SliceVerdict::Neutral }
}

/// Streaks of identical verdicts ending at the most recent closed slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkAssessment {
    pub bad_streak: usize,
    pub good_streak: usize,
}

/// Walk closed slices newest first, stopping at slices that started before `since_ms`.
pub fn assess(store: &RuntimeInfoStore, since_ms: Millis, config: &AdaptiveConfig) -> LinkAssessment {
    let mut assessment = LinkAssessment::default();
    let mut leading = None;

    for offset in 1..SLICE_COUNT {
        let slice = store.slice(offset);
        if slice.start_ms < since_ms {
            break;
        }
        let verdict = classify(slice, config);
        match (leading, verdict) {
            (None, SliceVerdict::Neutral) => break,
            (None, v) => leading = Some(v),
            (Some(lead), v) if lead != v => break,
            _ => {}
        }
        match verdict {
            SliceVerdict::Bad => assessment.bad_streak += 1,
            SliceVerdict::Good => assessment.good_streak += 1,
            SliceVerdict::Neutral => {}
        }
    }
    assessment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::PacketEvent;

    fn slice(received: u16, missing: u16, dbm: Option<i16>) -> TimeSlice {
        let mut slice = TimeSlice::default();
        for _ in 0..received {
            slice.record_event(0, PacketEvent::Video);
        }
        if missing > 0 {
            slice.record_event(0, PacketEvent::Missing(missing));
        }
        if let Some(dbm) = dbm {
            slice.signal[0].antennas[0].record(dbm, -95, None);
        }
        slice
    }

    #[test]
    fn verdicts() {
        let config = AdaptiveConfig::default();
        assert_eq!(classify(&slice(70, 30, None), &config), SliceVerdict::Bad);
        assert_eq!(classify(&slice(100, 0, Some(-90)), &config), SliceVerdict::Bad);
        assert_eq!(classify(&slice(100, 0, Some(-60)), &config), SliceVerdict::Good);
        assert_eq!(classify(&slice(100, 0, None), &config), SliceVerdict::Good);
        assert_eq!(classify(&slice(90, 10, Some(-60)), &config), SliceVerdict::Neutral);
        assert_eq!(classify(&slice(100, 0, Some(-80)), &config), SliceVerdict::Neutral);
        assert_eq!(classify(&TimeSlice::default(), &config), SliceVerdict::Neutral);

        let mut skipped = slice(100, 0, Some(-60));
        skipped.blocks.skipped_blocks = 1;
        assert_eq!(classify(&skipped, &config), SliceVerdict::Bad);
    }

    #[test]
    fn streak_stops_at_the_first_different_verdict() {
        let config = AdaptiveConfig::default();
        let mut store = RuntimeInfoStore::new(100, 0);

        let script = [(100u16, 0u16), (60, 40), (60, 40)];
        for (i, (received, missing)) in script.iter().enumerate() {
            for _ in 0..*received {
                store.record_packet_event(0, PacketEvent::Video);
            }
            store.record_packet_event(0, PacketEvent::Missing(*missing));
            store.advance_if_due((i as u64 + 1) * 100);
        }

        let assessment = assess(&store, 0, &config);
        assert_eq!(assessment, LinkAssessment { bad_streak: 2, good_streak: 0 });
        assert_eq!(assess(&store, 200, &config).bad_streak, 1);
    }
}
