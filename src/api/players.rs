// Players resource and profile images

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, Result};
use crate::http_client::AuthenticatedClient;
use crate::models::{
    CreatePlayer, ImageUploadUrlRequest, Player, PresignDownloadRequest, PresignedDownload,
    PresignedUpload, StatsUpdate,
};
use crate::upload::{ImageFile, ImageUploader, ProgressCallback};

/// Result of creating a player with an optional image
#[derive(Debug)]
pub struct CreatedPlayer {
    pub player: Player,
    /// Set when the player was created but the image did not make it
    pub image_error: Option<ClientError>,
}

pub struct PlayersApi {
    client: Arc<AuthenticatedClient>,
    uploader: ImageUploader,
}

impl PlayersApi {
    pub fn new(client: Arc<AuthenticatedClient>, uploader: ImageUploader) -> Self {
        Self { client, uploader }
    }

    pub async fn list(&self) -> Result<Vec<Player>> {
        self.client.get_json("/players").await
    }

    pub async fn create(&self, payload: &CreatePlayer) -> Result<Player> {
        if payload.name.trim().is_empty() || payload.village.trim().is_empty() {
            return Err(ClientError::Validation(
                "Name and village required".to_string(),
            ));
        }

        let player: Player = self.client.post_json("/players", payload).await?;
        tracing::info!(player_id = %player.id, name = %player.name, "Player created");
        Ok(player)
    }

    pub async fn delete(&self, player_id: &str) -> Result<()> {
        self.client.delete(&format!("/players/{}", player_id)).await?;
        tracing::info!(player_id, "Player deleted");
        Ok(())
    }

    pub async fn update_stats(&self, player_id: &str, update: &StatsUpdate) -> Result<()> {
        if update.is_empty() {
            return Err(ClientError::Validation("No stats to update".to_string()));
        }

        self.client
            .put(&format!("/players/{}/stats", player_id), update)
            .await?;
        tracing::info!(player_id, format = %update.format, "Player stats updated");
        Ok(())
    }

    /// Presigned PUT for a player's profile image
    pub async fn image_upload_url(
        &self,
        player_id: &str,
        file_name: &str,
        content_type: &str,
    ) -> Result<PresignedUpload> {
        self.client
            .post_json(
                &format!("/players/{}/image-url", player_id),
                &ImageUploadUrlRequest {
                    file_name,
                    content_type,
                },
            )
            .await
    }

    /// Presigned GET for a stored object
    pub async fn image_download_url(&self, key: &str) -> Result<PresignedDownload> {
        self.client
            .post_json("/s3/presign-download", &PresignDownloadRequest { key })
            .await
    }

    /// Upload a profile image and return its storage key
    pub async fn upload_image(
        &self,
        player_id: &str,
        file: &ImageFile,
        progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.uploader.validate(file)?;

        let presigned = self
            .image_upload_url(player_id, &file.file_name, &file.content_type)
            .await?;
        self.uploader.put(&presigned, file, progress, cancel).await?;

        Ok(presigned.key)
    }

    /// Create a player, then upload its image
    ///
    /// The image is validated before anything is created. A failed or cancelled
    /// upload leaves the created player in place without an `image_key`.
    pub async fn create_with_image(
        &self,
        payload: &CreatePlayer,
        image: Option<&ImageFile>,
        progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<CreatedPlayer> {
        if let Some(file) = image {
            self.uploader.validate(file)?;
        }

        let mut player = self.create(payload).await?;
        let Some(file) = image else {
            return Ok(CreatedPlayer {
                player,
                image_error: None,
            });
        };

        match self.upload_image(&player.id, file, progress, cancel).await {
            Ok(key) => {
                player.image_key = Some(key);
                Ok(CreatedPlayer {
                    player,
                    image_error: None,
                })
            }
            Err(e) => {
                tracing::warn!(player_id = %player.id, error = %e, "Player created without image");
                Ok(CreatedPlayer {
                    player,
                    image_error: Some(e),
                })
            }
        }
    }
}
