use std::sync::Arc;

use crate::AppState;

pub const HELP_TEXT: &str = "📌 Commands\n\n\
/download <link> - download a video or its audio track\n\
/formats <link> - list the formats available for a link\n\
/help - show this message\n\n\
📌 How it works\n\
1️⃣ Send /download <link>.\n\
2️⃣ Pick Video (MP4) or Audio (MP3).\n\
3️⃣ Wait for the bot to send the file.\n\n\
Files over 50 MB are zipped, or re-encoded at a lower quality if zipping is not enough.";

pub async fn handle_help(state: &Arc<AppState>, chat_id: i64) -> anyhow::Result<()> {
    state.api.send_message(chat_id, &help_text(state.settings.pipeline.max_size_mb), None).await?;
    Ok(())
}

pub fn help_text(max_size_mb: u64) -> String {
    HELP_TEXT.replace("50 MB", &format!("{} MB", max_size_mb))
}
