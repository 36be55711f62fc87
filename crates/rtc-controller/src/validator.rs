//! Identity and credential validation.
//!
//! Pure checks run before any command touches session state or the media
//! engine. Nothing here performs I/O.

use crate::errors::ValidationError;
use crate::params::{
    AppScene, AudioFrame, EnterRoomParams, Role, RoomRef, SpeedTestParams, VideoEncParam,
    VideoFrame,
};
use common::secret::ExposeSecret;

/// Maximum user id length in bytes.
pub const MAX_USER_ID_LEN: usize = 32;

/// Maximum string room id length in bytes.
pub const MAX_STR_ROOM_ID_LEN: usize = 64;

/// Upper bound for volume settings.
pub const MAX_VOLUME: u32 = 150;

const STR_ROOM_ID_SYMBOLS: &str = " _-!#$%&()+:;<=.>?@[]^{}|~,";

/// Room entry after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedEntry {
    pub room: RoomRef,
    pub role: Role,
}

/// Validate room-entry parameters for `scene`.
///
/// Resolves the room reference and the effective role. Call scenes have no
/// audience so the role is always `Anchor`; live scenes require the caller
/// to pick one.
pub fn validate_enter_room(
    params: &EnterRoomParams,
    scene: AppScene,
) -> Result<ValidatedEntry, ValidationError> {
    if params.sdk_app_id == 0 {
        return Err(ValidationError::InvalidAppId);
    }
    validate_user_id(&params.user_id)?;
    if params.user_sig.expose_secret().is_empty() {
        return Err(ValidationError::MissingCredential);
    }

    let room = params.room.resolve_strict()?;
    validate_room_ref(&room)?;

    let role = if scene.has_roles() {
        params.role.ok_or(ValidationError::InvalidScene)?
    } else {
        Role::Anchor
    };

    Ok(ValidatedEntry { room, role })
}

pub fn validate_user_id(user_id: &str) -> Result<(), ValidationError> {
    let well_formed = !user_id.is_empty()
        && user_id.len() <= MAX_USER_ID_LEN
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if well_formed {
        Ok(())
    } else {
        Err(ValidationError::InvalidUserId)
    }
}

pub fn validate_room_ref(room: &RoomRef) -> Result<(), ValidationError> {
    match room {
        RoomRef::Numeric(id) => {
            if *id == 0 || *id == u32::MAX {
                return Err(ValidationError::InvalidRoomReference);
            }
        }
        RoomRef::Str(id) => {
            let well_formed = !id.is_empty()
                && id.len() <= MAX_STR_ROOM_ID_LEN
                && id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || STR_ROOM_ID_SYMBOLS.contains(c));
            if !well_formed {
                return Err(ValidationError::InvalidRoomReference);
            }
        }
    }
    Ok(())
}

pub fn validate_volume(volume: u32) -> Result<(), ValidationError> {
    if volume > MAX_VOLUME {
        return Err(ValidationError::InvalidVolume(volume));
    }
    Ok(())
}

pub fn validate_video_enc_param(param: &VideoEncParam) -> Result<(), ValidationError> {
    if param.width == 0
        || param.height == 0
        || param.fps == 0
        || param.fps > 60
        || param.bitrate_kbps == 0
    {
        return Err(ValidationError::InvalidVideoEncParam);
    }
    Ok(())
}

pub fn validate_video_frame(frame: &VideoFrame) -> Result<(), ValidationError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(ValidationError::InvalidFrame);
    }
    // I420: full luma plane plus two quarter-size chroma planes.
    let pixels = u64::from(frame.width) * u64::from(frame.height);
    let expected = pixels + pixels / 2;
    if (frame.data.len() as u64) < expected {
        return Err(ValidationError::InvalidFrame);
    }
    Ok(())
}

pub fn validate_audio_frame(frame: &AudioFrame) -> Result<(), ValidationError> {
    let rate_ok = matches!(frame.sample_rate, 16000 | 32000 | 44100 | 48000);
    let channels_ok = matches!(frame.channels, 1 | 2);
    if !rate_ok || !channels_ok || frame.data.is_empty() {
        return Err(ValidationError::InvalidFrame);
    }
    // 16-bit interleaved samples
    let sample_bytes = 2 * frame.channels as usize;
    if frame.data.len() % sample_bytes != 0 {
        return Err(ValidationError::InvalidFrame);
    }
    Ok(())
}

/// Speed tests carry their own credentials since they run outside a room.
pub fn validate_speed_test(params: &SpeedTestParams) -> Result<(), ValidationError> {
    if params.sdk_app_id == 0 {
        return Err(ValidationError::InvalidAppId);
    }
    validate_user_id(&params.user_id)?;
    if params.user_sig.expose_secret().is_empty() {
        return Err(ValidationError::MissingCredential);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::params::RoomIdentifier;
    use bytes::Bytes;
    use common::secret::SecretString;

    fn params(room: RoomIdentifier, role: Option<Role>) -> EnterRoomParams {
        EnterRoomParams {
            sdk_app_id: 1_400_000_001,
            user_id: "alice".to_string(),
            user_sig: SecretString::from("sig"),
            room,
            role,
            private_map_key: None,
            stream_id: None,
        }
    }

    #[test]
    fn test_valid_live_entry() {
        let entry = validate_enter_room(
            &params(RoomIdentifier::numeric(101), Some(Role::Anchor)),
            AppScene::Live,
        )
        .unwrap();
        assert_eq!(entry.room, RoomRef::Numeric(101));
        assert_eq!(entry.role, Role::Anchor);
    }

    #[test]
    fn test_both_room_ids_rejected() {
        let room = RoomIdentifier {
            room_id: Some(101),
            str_room_id: Some("101".to_string()),
        };
        assert_eq!(
            validate_enter_room(&params(room, None), AppScene::VideoCall),
            Err(ValidationError::InvalidRoomReference)
        );
    }

    #[test]
    fn test_neither_room_id_rejected() {
        assert_eq!(
            validate_enter_room(
                &params(RoomIdentifier::default(), None),
                AppScene::VideoCall
            ),
            Err(ValidationError::InvalidRoomReference)
        );
    }

    #[test]
    fn test_live_scene_requires_role() {
        for scene in [AppScene::Live, AppScene::VoiceChatRoom] {
            assert_eq!(
                validate_enter_room(&params(RoomIdentifier::numeric(1), None), scene),
                Err(ValidationError::InvalidScene)
            );
        }
    }

    #[test]
    fn test_call_scenes_force_anchor() {
        let entry = validate_enter_room(
            &params(RoomIdentifier::numeric(1), Some(Role::Audience)),
            AppScene::AudioCall,
        )
        .unwrap();
        assert_eq!(entry.role, Role::Anchor);
    }

    #[test]
    fn test_credential_checks() {
        let mut p = params(RoomIdentifier::numeric(1), None);
        p.sdk_app_id = 0;
        assert_eq!(
            validate_enter_room(&p, AppScene::VideoCall),
            Err(ValidationError::InvalidAppId)
        );

        let mut p = params(RoomIdentifier::numeric(1), None);
        p.user_sig = SecretString::from("");
        assert_eq!(
            validate_enter_room(&p, AppScene::VideoCall),
            Err(ValidationError::MissingCredential)
        );
    }

    #[test]
    fn test_user_id_rules() {
        assert!(validate_user_id("user_01-b").is_ok());
        assert_eq!(validate_user_id(""), Err(ValidationError::InvalidUserId));
        assert_eq!(
            validate_user_id("has space"),
            Err(ValidationError::InvalidUserId)
        );
        assert_eq!(
            validate_user_id(&"a".repeat(33)),
            Err(ValidationError::InvalidUserId)
        );
    }

    #[test]
    fn test_string_room_rules() {
        assert!(validate_room_ref(&RoomRef::Str("room-1 (main)".to_string())).is_ok());
        assert!(validate_room_ref(&RoomRef::Str("x".repeat(65))).is_err());
        assert!(validate_room_ref(&RoomRef::Str("caf\u{e9}".to_string())).is_err());
        assert!(validate_room_ref(&RoomRef::Numeric(u32::MAX)).is_err());
    }

    #[test]
    fn test_volume_bounds() {
        assert!(validate_volume(0).is_ok());
        assert!(validate_volume(150).is_ok());
        assert_eq!(validate_volume(151), Err(ValidationError::InvalidVolume(151)));
    }

    #[test]
    fn test_frame_validation() {
        let frame = VideoFrame {
            width: 4,
            height: 2,
            timestamp_ms: 0,
            data: Bytes::from(vec![0u8; 12]),
        };
        assert!(validate_video_frame(&frame).is_ok());

        let short = VideoFrame {
            data: Bytes::from(vec![0u8; 11]),
            ..frame
        };
        assert_eq!(validate_video_frame(&short), Err(ValidationError::InvalidFrame));

        let audio = AudioFrame {
            sample_rate: 48000,
            channels: 2,
            timestamp_ms: 0,
            data: Bytes::from(vec![0u8; 1920]),
        };
        assert!(validate_audio_frame(&audio).is_ok());

        let odd = AudioFrame {
            sample_rate: 22050,
            ..audio
        };
        assert_eq!(validate_audio_frame(&odd), Err(ValidationError::InvalidFrame));
    }

    #[test]
    fn test_speed_test_credentials() {
        let mut params = SpeedTestParams {
            sdk_app_id: 1_400_000_001,
            user_id: "tester".to_string(),
            user_sig: SecretString::from("sig"),
            expected_up_bandwidth_kbps: 1000,
            expected_down_bandwidth_kbps: 2000,
        };
        assert!(validate_speed_test(&params).is_ok());

        params.user_sig = SecretString::from("");
        assert_eq!(
            validate_speed_test(&params),
            Err(ValidationError::MissingCredential)
        );
    }
}
