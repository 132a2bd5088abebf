use crate::peer::types::IceCandidate;
use tracing::{debug, warn};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

/// Candidate type as written in the `typ` attribute
pub fn candidate_type(candidate: &IceCandidate) -> Option<&str> {
    let mut parts = candidate.candidate.split_whitespace();
    parts.find(|p| *p == "typ")?;
    parts.next()
}

/// Trace a trickled candidate
pub fn dump_candidate(peer_id: &str, label: &str, cand: &RTCIceCandidate) {
    if let Ok(init) = cand.to_json() {
        debug!(
            "Trickle {label} [{peer_id}]: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
            init.candidate, init.sdp_mid, init.sdp_mline_index, init.username_fragment
        );
    }
}

/// Quick getStats snapshot of the nominated pair
pub async fn dump_selected_pair(peer_id: &str, pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, v) in stats.reports {
        if let StatsReportType::CandidatePair(pair) = v {
            if pair.nominated {
                debug!(
                    "STATS {moment} [{peer_id}]: {}:{}  type: {:?}  bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.stats_type,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}

/// Warns when no TURN relay candidate showed up
pub fn analyze_candidates(peer_id: &str, candidates: &[IceCandidate]) {
    let mut host_count = 0;
    let mut srflx_count = 0;
    let mut relay_count = 0;

    for candidate in candidates {
        match candidate_type(candidate) {
            Some("host") => host_count += 1,
            Some("srflx") => srflx_count += 1,
            Some("relay") => relay_count += 1,
            _ => {}
        }
    }

    debug!(
        "Candidate analysis for {}: {} host, {} srflx, {} relay",
        peer_id, host_count, srflx_count, relay_count
    );

    if relay_count == 0 {
        warn!("No TURN relay candidates for {}; a connection through NAT may fail", peer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(line: &str) -> IceCandidate {
        IceCandidate {
            candidate: line.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    #[test]
    fn test_candidate_type() {
        let host = cand("candidate:1 1 udp 2130706431 192.168.1.4 50000 typ host");
        let srflx = cand("candidate:2 1 udp 1694498815 203.0.113.9 50001 typ srflx raddr 0.0.0.0 rport 0");
        assert_eq!(candidate_type(&host), Some("host"));
        assert_eq!(candidate_type(&srflx), Some("srflx"));
        assert_eq!(candidate_type(&cand("garbage")), None);
    }

    #[test]
    fn test_init_conversion_keeps_fields() {
        let mut c = cand("candidate:1 1 udp 1 10.0.0.1 9 typ host");
        c.username_fragment = Some("frag".into());
        let init: RTCIceCandidateInit = c.clone().into();
        assert_eq!(init.sdp_mline_index, Some(0));
        assert_eq!(IceCandidate::from(init), c);
    }
}
