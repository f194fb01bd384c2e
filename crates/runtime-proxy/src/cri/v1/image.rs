// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::sync::Arc;

use protocols::v1;
use tonic::{Request, Response, Status};

use crate::cri::backend::ImageBackendClient;

/// Every image RPC is a plain forward; no hook plugin observes them.
pub struct ImageServer {
    backend: Arc<ImageBackendClient>,
}

impl ImageServer {
    pub fn new(backend: Arc<ImageBackendClient>) -> Self {
        Self { backend }
    }
}

#[async_trait::async_trait]
impl v1::image_service_server::ImageService for ImageServer {
    async fn list_images(
        &self,
        request: Request<v1::ListImagesRequest>,
    ) -> Result<Response<v1::ListImagesResponse>, Status> {
        self.backend
            .list_images(request.into_inner())
            .await
            .map(Response::new)
    }

    async fn image_status(
        &self,
        request: Request<v1::ImageStatusRequest>,
    ) -> Result<Response<v1::ImageStatusResponse>, Status> {
        self.backend
            .image_status(request.into_inner())
            .await
            .map(Response::new)
    }

    async fn pull_image(
        &self,
        request: Request<v1::PullImageRequest>,
    ) -> Result<Response<v1::PullImageResponse>, Status> {
        self.backend
            .pull_image(request.into_inner())
            .await
            .map(Response::new)
    }

    async fn remove_image(
        &self,
        request: Request<v1::RemoveImageRequest>,
    ) -> Result<Response<v1::RemoveImageResponse>, Status> {
        self.backend
            .remove_image(request.into_inner())
            .await
            .map(Response::new)
    }

    async fn image_fs_info(
        &self,
        request: Request<v1::ImageFsInfoRequest>,
    ) -> Result<Response<v1::ImageFsInfoResponse>, Status> {
        self.backend
            .image_fs_info(request.into_inner())
            .await
            .map(Response::new)
    }
}
