//! The algorithm contract driven by the executive.

use std::any::Any;
use std::sync::Arc;

use crate::data::{DataInformation, DataObject, ImageData};
use crate::error::{PipelineError, Result};
use crate::executive::NodeId;
use crate::extent::Extent;
use crate::information::{OutputInformation, UpdateRequest};

/// A processing step in a pipeline.
///
/// The executive calls the three request passes in order:
/// [`request_information`](Algorithm::request_information) upstream-first,
/// [`request_update_extent`](Algorithm::request_update_extent) downstream-first,
/// then [`request_data`](Algorithm::request_data) upstream-first for every
/// node that must execute.
pub trait Algorithm: Any + Send {
    /// Returns a reference to self as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Returns a mutable reference to self as `Any` for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Short name used in logs and errors.
    fn type_name(&self) -> &'static str;

    /// Number of input ports.
    fn number_of_input_ports(&self) -> usize {
        1
    }

    /// Number of output ports.
    fn number_of_output_ports(&self) -> usize {
        1
    }

    /// Whether an input port accepts more than one connection.
    fn input_port_repeatable(&self, _port: usize) -> bool {
        false
    }

    /// Whether an input port may stay unconnected.
    fn input_port_optional(&self, _port: usize) -> bool {
        false
    }

    /// Fills the output information from the input information.
    ///
    /// `inputs` is indexed by input port, then connection. The default copies
    /// the first input's information to every output.
    fn request_information(
        &mut self,
        inputs: &[Vec<OutputInformation>],
        outputs: &mut [OutputInformation],
    ) -> Result<()> {
        if let Some(first) = inputs.first().and_then(|port| port.first()) {
            for output in outputs.iter_mut() {
                output.clone_from(first);
            }
        }
        Ok(())
    }

    /// Refines the requests sent upstream for a request on `output_port`.
    ///
    /// On entry every entry of `inputs` holds a copy of `request`; the
    /// default keeps it.
    fn request_update_extent(
        &mut self,
        _output_port: usize,
        _request: &UpdateRequest,
        _inputs: &mut [Vec<UpdateRequest>],
        _input_information: &[Vec<OutputInformation>],
    ) -> Result<()> {
        Ok(())
    }

    /// Produces output data for the execution extents in `ctx`.
    fn request_data(&mut self, ctx: &mut ExecuteContext<'_>) -> Result<()>;
}

/// Inputs, requests and output slots for one `request_data` call.
pub struct ExecuteContext<'a> {
    node: NodeId,
    inputs: Vec<Vec<Arc<DataObject>>>,
    output_information: &'a [OutputInformation],
    requests: Vec<UpdateRequest>,
    execution_extents: Vec<Extent>,
    outputs: Vec<Option<Arc<DataObject>>>,
    time_steps: Vec<Option<f64>>,
    progress: &'a mut dyn FnMut(f64),
}

impl<'a> ExecuteContext<'a> {
    pub(crate) fn new(
        node: NodeId,
        inputs: Vec<Vec<Arc<DataObject>>>,
        output_information: &'a [OutputInformation],
        requests: Vec<UpdateRequest>,
        execution_extents: Vec<Extent>,
        progress: &'a mut dyn FnMut(f64),
    ) -> Self {
        let ports = output_information.len();
        Self {
            node,
            inputs,
            output_information,
            requests,
            execution_extents,
            outputs: vec![None; ports],
            time_steps: vec![None; ports],
            progress,
        }
    }

    /// The node being executed.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Input data on `port` from connection `connection`.
    pub fn input(&self, port: usize, connection: usize) -> Result<&Arc<DataObject>> {
        self.inputs
            .get(port)
            .and_then(|conns| conns.get(connection))
            .ok_or(PipelineError::MissingInput {
                node: self.node,
                port,
            })
    }

    /// All connections on input `port`, in connection order.
    pub fn input_connections(&self, port: usize) -> &[Arc<DataObject>] {
        self.inputs.get(port).map_or(&[], Vec::as_slice)
    }

    /// The extent output `port` must cover.
    pub fn execution_extent(&self, port: usize) -> Extent {
        self.execution_extents
            .get(port)
            .copied()
            .unwrap_or(Extent::EMPTY)
    }

    /// Information advertised for output `port`.
    pub fn output_information(&self, port: usize) -> Option<&OutputInformation> {
        self.output_information.get(port)
    }

    /// The request that scheduled output `port`.
    pub fn request(&self, port: usize) -> Option<&UpdateRequest> {
        self.requests.get(port)
    }

    /// Publishes image data on output `port`.
    pub fn set_output_image(&mut self, port: usize, image: ImageData) -> Result<()> {
        let slot = self.output_slot(port)?;
        *slot = Some(Arc::new(DataObject::new(image)));
        Ok(())
    }

    /// Forwards input data unchanged to output `port`, sharing the object.
    pub fn pass_input(&mut self, input_port: usize, output_port: usize) -> Result<()> {
        let data = Arc::clone(self.input(input_port, 0)?);
        let time = data.time_step();
        *self.output_slot(output_port)? = Some(data);
        if let Some(t) = time {
            self.set_data_time_step(output_port, t);
        }
        Ok(())
    }

    /// Records the time step actually produced on output `port`.
    pub fn set_data_time_step(&mut self, port: usize, time: f64) {
        if let Some(slot) = self.time_steps.get_mut(port) {
            *slot = Some(time);
        }
    }

    /// Reports progress in `[0, 1]` to the node's observers.
    pub fn update_progress(&mut self, amount: f64) {
        (self.progress)(amount.clamp(0.0, 1.0));
    }

    fn output_slot(&mut self, port: usize) -> Result<&mut Option<Arc<DataObject>>> {
        let node = self.node;
        self.outputs.get_mut(port).ok_or(PipelineError::InvalidPort {
            node,
            kind: "output",
            port,
        })
    }

    /// Consumes the context, returning the produced objects with the
    /// information describing them.
    pub(crate) fn into_outputs(self) -> Vec<Option<(Arc<DataObject>, Option<f64>)>> {
        self.outputs
            .into_iter()
            .zip(self.time_steps)
            .map(|(data, time)| data.map(|d| (d, time)))
            .collect()
    }
}

/// Builds the information record for data produced under `request`.
pub(crate) fn describe_output(
    data: &DataObject,
    request: &UpdateRequest,
    time_step: Option<f64>,
) -> DataInformation {
    DataInformation {
        extent: data.image().extent(),
        piece: request.piece,
        number_of_pieces: request.number_of_pieces,
        ghost_levels: request.ghost_levels,
        time_step: time_step.or(data.time_step()),
    }
}
