// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::sync::Arc;

use protocols::v1alpha2;
use tonic::{Request, Response, Status};

use crate::convert::{ConvertError, ToV1, ToV1alpha2};
use crate::cri::backend::ImageBackendClient;

fn from_convert_err(e: ConvertError) -> Status {
    Status::internal(e.to_string())
}

macro_rules! forwarded {
    ($self:ident, $request:ident, $method:ident) => {{
        let request = $request.into_inner().to_v1().map_err(from_convert_err)?;
        let response = $self.backend.$method(request).await?;
        Ok(Response::new(
            response.to_v1alpha2().map_err(from_convert_err)?,
        ))
    }};
}

pub struct ImageServer {
    backend: Arc<ImageBackendClient>,
}

impl ImageServer {
    pub fn new(backend: Arc<ImageBackendClient>) -> Self {
        Self { backend }
    }
}

#[async_trait::async_trait]
impl v1alpha2::image_service_server::ImageService for ImageServer {
    async fn list_images(
        &self,
        request: Request<v1alpha2::ListImagesRequest>,
    ) -> Result<Response<v1alpha2::ListImagesResponse>, Status> {
        forwarded!(self, request, list_images)
    }

    async fn image_status(
        &self,
        request: Request<v1alpha2::ImageStatusRequest>,
    ) -> Result<Response<v1alpha2::ImageStatusResponse>, Status> {
        forwarded!(self, request, image_status)
    }

    async fn pull_image(
        &self,
        request: Request<v1alpha2::PullImageRequest>,
    ) -> Result<Response<v1alpha2::PullImageResponse>, Status> {
        forwarded!(self, request, pull_image)
    }

    async fn remove_image(
        &self,
        request: Request<v1alpha2::RemoveImageRequest>,
    ) -> Result<Response<v1alpha2::RemoveImageResponse>, Status> {
        forwarded!(self, request, remove_image)
    }

    async fn image_fs_info(
        &self,
        request: Request<v1alpha2::ImageFsInfoRequest>,
    ) -> Result<Response<v1alpha2::ImageFsInfoResponse>, Status> {
        forwarded!(self, request, image_fs_info)
    }
}
