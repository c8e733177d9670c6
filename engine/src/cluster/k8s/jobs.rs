use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, DeleteParams, PostParams};

use crate::Error;

/// Wrapper for batch job api routes in k8s
pub struct Jobs {
    client: kube::Client,
    namespace: String,
}

impl Jobs {
    /// Build a new jobs wrapper
    ///
    /// # Arguments
    ///
    /// * `client` - The kubernetes client to issue requests with
    /// * `namespace` - The namespace workloads are launched into
    pub fn new(client: &kube::Client, namespace: &str) -> Self {
        Jobs {
            client: client.clone(),
            namespace: namespace.to_owned(),
        }
    }

    /// Create a batch workload from an already-built manifest
    ///
    /// # Arguments
    ///
    /// * `manifest` - The job manifest produced by the workload template
    pub async fn create(&self, manifest: Job) -> Result<(), Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), &self.namespace);
        api.create(&PostParams::default(), &manifest).await?;
        Ok(())
    }

    /// Delete a batch workload by name, treating not-found as success
    ///
    /// # Arguments
    ///
    /// * `name` - The workload's name
    pub async fn delete(&self, name: &str) -> Result<(), Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), &self.namespace);
        let params = DeleteParams {
            propagation_policy: Some(kube::api::PropagationPolicy::Background),
            ..Default::default()
        };
        if let Err(error) = api.delete(name, &params).await {
            match &error {
                kube::Error::Api(api_err) if api_err.code == 404 => return Ok(()),
                _ => return Err(Error::from(error)),
            }
        }
        Ok(())
    }
}
