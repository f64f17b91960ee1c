#![no_main]

use libfuzzer_sys::fuzz_target;
use room_session_client::protocol::{RoomResponse, ServerFrame, ServerPush};

fuzz_target!(|data: &[u8]| {
    // Raw-byte path, including serde_json's own UTF-8 handling.
    let Ok(frame) = serde_json::from_slice::<ServerFrame>(data) else {
        return;
    };

    // Whatever decodes must survive the same checks the client applies.
    match frame {
        ServerFrame::Ack { response, .. } => {
            if let Ok(response) = serde_json::from_value::<RoomResponse>(response) {
                let _ = response.ensure_success("room:get");
                if let Some(room) = response.room {
                    let _ = room.validate();
                }
            }
        }
        ServerFrame::Push(
            ServerPush::RoomCreated { room }
            | ServerPush::RoomJoined { room }
            | ServerPush::RoomUpdated { room },
        ) => {
            let _ = room.validate();
        }
        ServerFrame::Push(push) => {
            let _ = push.kind();
        }
    }
});
