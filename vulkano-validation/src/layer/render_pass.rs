use super::{
    command_buffer::{CommandInfo, RenderPassScope},
    ValidationLayer,
};
use crate::{
    command_buffer::{
        BindingBreak, CommandBufferLevel, CommandBufferMut, CommandBufferState,
        RenderPassInstance, SubpassContents,
    },
    device::QueueFlags,
    image::{ImageLayout, ImageViewState},
    registry::StateObject,
    render_pass::{
        framebuffer::{FramebufferCreateInfo, FramebufferLimits, FramebufferState},
        RenderPassBeginInfo, RenderPassCreateInfo, RenderPassState,
    },
    ErrorKind, ValidationError,
};
use ash::vk;
use std::sync::Arc;

const BEGIN_RENDER_PASS: CommandInfo = CommandInfo {
    name: "vkCmdBeginRenderPass",
    recording_vuids: &["VUID-vkCmdBeginRenderPass-commandBuffer-recording"],
    render_pass: RenderPassScope::Outside(&["VUID-vkCmdBeginRenderPass-renderpass"]),
    queue_flags: QueueFlags::GRAPHICS,
    queue_flags_vuids: &["VUID-vkCmdBeginRenderPass-commandBuffer-cmdpool"],
    in_secondary_subpass: false,
};

const NEXT_SUBPASS: CommandInfo = CommandInfo {
    name: "vkCmdNextSubpass",
    recording_vuids: &["VUID-vkCmdNextSubpass-commandBuffer-recording"],
    render_pass: RenderPassScope::Inside(&["VUID-vkCmdNextSubpass-renderpass"]),
    queue_flags: QueueFlags::GRAPHICS,
    queue_flags_vuids: &["VUID-vkCmdNextSubpass-commandBuffer-cmdpool"],
    in_secondary_subpass: true,
};

const END_RENDER_PASS: CommandInfo = CommandInfo {
    name: "vkCmdEndRenderPass",
    recording_vuids: &["VUID-vkCmdEndRenderPass-commandBuffer-recording"],
    render_pass: RenderPassScope::Inside(&["VUID-vkCmdEndRenderPass-renderpass"]),
    queue_flags: QueueFlags::GRAPHICS,
    queue_flags_vuids: &["VUID-vkCmdEndRenderPass-commandBuffer-cmdpool"],
    in_secondary_subpass: true,
};

impl ValidationLayer {
    pub fn validate_create_render_pass(&self, create_info: &RenderPassCreateInfo) -> bool {
        self.emit_result(
            create_info
                .validate(self.device_info.limits.max_color_attachments)
                .map_err(|error| error.add_context("create_info")),
        )
    }

    pub fn record_create_render_pass(
        &self,
        render_pass: vk::RenderPass,
        create_info: RenderPassCreateInfo,
    ) {
        self.registry
            .render_passes
            .insert(Arc::new(RenderPassState::new(render_pass, create_info)));
    }

    pub fn validate_destroy_render_pass(&self, render_pass: vk::RenderPass) -> bool {
        self.validate_destroy(
            &self.registry.render_passes,
            render_pass,
            &["VUID-vkDestroyRenderPass-renderPass-00873"],
        )
    }

    pub fn record_destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.destroy_object(
            &self.registry.render_passes,
            render_pass,
            BindingBreak::Destroyed,
        );
    }

    /// Returns the views of `handles`, or `None` if any of them is unknown.
    pub(crate) fn resolve_image_views(
        &self,
        handles: &[vk::ImageView],
    ) -> Option<Vec<Arc<ImageViewState>>> {
        handles
            .iter()
            .map(|&view| self.registry.image_views.get(view))
            .collect()
    }

    fn framebuffer_limits(&self) -> FramebufferLimits {
        let limits = &self.device_info.limits;

        FramebufferLimits {
            max_width: limits.max_framebuffer_width,
            max_height: limits.max_framebuffer_height,
            max_layers: limits.max_framebuffer_layers,
        }
    }

    pub fn validate_create_framebuffer(&self, create_info: &FramebufferCreateInfo) -> bool {
        let Some(render_pass) = self.registry.render_passes.get(create_info.render_pass) else {
            return false;
        };

        if create_info.is_imageless() && !self.device_info.enabled_features.imageless_framebuffer {
            return self.emit(Box::new(ValidationError {
                context: "create_info.flags".into(),
                problem: "contains `IMAGELESS`, but the `imageless_framebuffer` feature is not \
                    enabled"
                    .into(),
                vuids: &["VUID-VkFramebufferCreateInfo-flags-03189"],
                kind: ErrorKind::MissingPrerequisite,
                ..Default::default()
            }));
        }

        let Some(views) = self.resolve_image_views(&create_info.attachments) else {
            return false;
        };

        self.emit_result(
            create_info
                .validate(&render_pass, &views, self.framebuffer_limits())
                .map_err(|error| error.add_context("create_info")),
        )
    }

    pub fn record_create_framebuffer(
        &self,
        framebuffer: vk::Framebuffer,
        create_info: FramebufferCreateInfo,
    ) {
        let Some(render_pass) = self.registry.render_passes.get(create_info.render_pass) else {
            return;
        };
        let Some(views) = self.resolve_image_views(&create_info.attachments) else {
            return;
        };

        log::trace!(
            "{} created with {} attachment(s){}",
            self.format_handle(crate::TypedHandle::new(framebuffer)),
            views.len(),
            if create_info.is_imageless() { ", imageless" } else { "" },
        );

        self.registry.framebuffers.insert(Arc::new(FramebufferState::new(
            framebuffer,
            create_info,
            render_pass,
            views,
        )));
    }

    pub fn validate_destroy_framebuffer(&self, framebuffer: vk::Framebuffer) -> bool {
        self.validate_destroy(
            &self.registry.framebuffers,
            framebuffer,
            &["VUID-vkDestroyFramebuffer-framebuffer-00892"],
        )
    }

    pub fn record_destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        if let Some(state) = self.destroy_object(
            &self.registry.framebuffers,
            framebuffer,
            BindingBreak::Destroyed,
        ) {
            log::trace!("destroyed framebuffer over {}", state.render_pass.typed_handle());
        }
    }

    fn validate_primary_only(
        &self,
        cb: &CommandBufferState,
        info: &CommandInfo,
        vuids: &'static [&'static str],
    ) -> bool {
        if cb.level == CommandBufferLevel::Primary {
            return false;
        }

        self.emit(Box::new(ValidationError {
            context: info.name.into(),
            problem: "is recorded in a secondary command buffer".into(),
            vuids,
            kind: ErrorKind::StateIncompatible,
            objects: [cb.typed_handle()].into_iter().collect(),
            ..Default::default()
        }))
    }

    pub fn validate_cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &RenderPassBeginInfo,
    ) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let state = cb.state.lock();
        let mut skip = self.validate_cmd(&cb, &state, &BEGIN_RENDER_PASS);
        drop(state);

        skip |= self.validate_primary_only(
            &cb,
            &BEGIN_RENDER_PASS,
            &["VUID-vkCmdBeginRenderPass-bufferlevel"],
        );

        let (Some(render_pass), Some(framebuffer)) = (
            self.registry.render_passes.get(begin_info.render_pass),
            self.registry.framebuffers.get(begin_info.framebuffer),
        ) else {
            return skip;
        };

        if let Err(error) = framebuffer.render_pass.validate_compatible(&render_pass) {
            skip |= self.emit(
                error
                    .set_vuids(&["VUID-VkRenderPassBeginInfo-renderPass-00904"])
                    .add_context("begin_info.framebuffer"),
            );
        }

        let Some(views) = self.resolve_image_views(&begin_info.attachments) else {
            return skip;
        };

        if let Err(error) = framebuffer.validate_attachment_begin_info(&render_pass, &views) {
            skip |= self.emit(error.add_context("begin_info"));
        }

        let area = begin_info.render_area;
        let fb_info = &framebuffer.create_info;

        for (offset, extent, limit, vuids) in [
            (
                area.offset.x,
                area.extent.width,
                fb_info.width,
                &["VUID-VkRenderPassBeginInfo-pNext-02852"],
            ),
            (
                area.offset.y,
                area.extent.height,
                fb_info.height,
                &["VUID-VkRenderPassBeginInfo-pNext-02853"],
            ),
        ] {
            if offset < 0 || i64::from(offset) + i64::from(extent) > i64::from(limit) {
                skip |= self.emit(Box::new(ValidationError {
                    context: "begin_info.render_area".into(),
                    problem: format!(
                        "is {:?}, which does not fit in the framebuffer of size {}x{}",
                        area, fb_info.width, fb_info.height,
                    )
                    .into(),
                    vuids,
                    kind: ErrorKind::ParameterOutOfRange,
                    objects: [cb.typed_handle(), framebuffer.typed_handle()]
                        .into_iter()
                        .collect(),
                    ..Default::default()
                }));
            }
        }

        skip
    }

    pub fn record_cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &RenderPassBeginInfo,
        contents: SubpassContents,
    ) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };
        let (Some(render_pass), Some(framebuffer)) = (
            self.registry.render_passes.get(begin_info.render_pass),
            self.registry.framebuffers.get(begin_info.framebuffer),
        ) else {
            return;
        };
        let views = self
            .resolve_image_views(&begin_info.attachments)
            .unwrap_or_default();
        let attachments = framebuffer.resolve_attachments(&views).to_vec();
        let render_pass_handle = render_pass.typed_handle();

        let mut state = cb.state.lock();

        cb.bind_object(&mut state, render_pass.base());
        cb.bind_object(&mut state, framebuffer.base());

        for view in &attachments {
            cb.bind_object(&mut state, view.base());
        }

        state.active_render_pass_device_mask = if begin_info.device_mask != 0 {
            begin_info.device_mask
        } else {
            state.initial_device_mask
        };
        state.render_pass = Some(RenderPassInstance {
            render_pass,
            framebuffer: Some(framebuffer),
            attachments,
            subpass: 0,
            contents,
            render_area: begin_info.render_area,
        });
        transition_subpass_attachments(&mut state);

        log::trace!("{} begins {}", cb.typed_handle(), render_pass_handle);
    }

    pub fn validate_cmd_next_subpass(&self, command_buffer: vk::CommandBuffer) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let state = cb.state.lock();
        let mut skip = self.validate_cmd(&cb, &state, &NEXT_SUBPASS);
        skip |=
            self.validate_primary_only(&cb, &NEXT_SUBPASS, &["VUID-vkCmdNextSubpass-bufferlevel"]);

        if let Some(instance) = &state.render_pass {
            if instance.subpass + 1 >= instance.render_pass.subpass_count() {
                skip |= self.emit(Box::new(ValidationError {
                    context: NEXT_SUBPASS.name.into(),
                    problem: format!(
                        "is recorded in subpass {}, which is the last subpass of the render pass",
                        instance.subpass,
                    )
                    .into(),
                    vuids: &["VUID-vkCmdNextSubpass-None-00909"],
                    kind: ErrorKind::StateIncompatible,
                    objects: [cb.typed_handle(), instance.render_pass.typed_handle()]
                        .into_iter()
                        .collect(),
                    ..Default::default()
                }));
            }
        }

        skip
    }

    pub fn record_cmd_next_subpass(
        &self,
        command_buffer: vk::CommandBuffer,
        contents: SubpassContents,
    ) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };

        let mut state = cb.state.lock();
        let Some(instance) = &mut state.render_pass else {
            return;
        };

        if instance.subpass + 1 < instance.render_pass.subpass_count() {
            instance.subpass += 1;
        }

        instance.contents = contents;
        transition_subpass_attachments(&mut state);
    }

    pub fn validate_cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) -> bool {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return false;
        };

        let state = cb.state.lock();
        let mut skip = self.validate_cmd(&cb, &state, &END_RENDER_PASS);
        skip |= self.validate_primary_only(
            &cb,
            &END_RENDER_PASS,
            &["VUID-vkCmdEndRenderPass-bufferlevel"],
        );

        if let Some(instance) = &state.render_pass {
            let last = instance.render_pass.subpass_count() - 1;

            if instance.subpass != last {
                skip |= self.emit(Box::new(ValidationError {
                    context: END_RENDER_PASS.name.into(),
                    problem: format!(
                        "is recorded in subpass {}, but the render pass ends after subpass {}",
                        instance.subpass, last,
                    )
                    .into(),
                    vuids: &["VUID-vkCmdEndRenderPass-None-00910"],
                    kind: ErrorKind::StateIncompatible,
                    objects: [cb.typed_handle(), instance.render_pass.typed_handle()]
                        .into_iter()
                        .collect(),
                    ..Default::default()
                }));
            }
        }

        skip
    }

    pub fn record_cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        let Some(cb) = self.registry.command_buffers.get(command_buffer) else {
            return;
        };

        let mut state = cb.state.lock();
        let Some(instance) = state.render_pass.take() else {
            return;
        };

        for (attachment, description) in
            instance.render_pass.create_info.attachments.iter().enumerate()
        {
            let Some(view) = instance.attachments.get(attachment) else {
                continue;
            };

            state.set_image_layout(
                &view.image,
                &view.normalized_range,
                description.initial_layout,
                description.final_layout,
            );
        }

        state.active_render_pass_device_mask = 0;
    }
}

/// Moves the attachments of the current subpass to the layouts the subpass uses them in.
fn transition_subpass_attachments(state: &mut CommandBufferMut) {
    let Some(instance) = &state.render_pass else {
        return;
    };

    let transitions: Vec<(Arc<ImageViewState>, ImageLayout, ImageLayout)> = instance
        .render_pass
        .subpass_layouts(instance.subpass)
        .into_iter()
        .filter_map(|(attachment, layout)| {
            let view = instance.attachments.get(attachment as usize)?;
            let description = instance
                .render_pass
                .create_info
                .attachments
                .get(attachment as usize)?;

            Some((view.clone(), description.initial_layout, layout))
        })
        .collect();

    for (view, old_layout, new_layout) in transitions {
        state.set_image_layout(&view.image, &view.normalized_range, old_layout, new_layout);
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        command_buffer::SubpassContents,
        device::DeviceInfo,
        image::{ImageAspects, ImageCreateInfo, ImageLayout, ImageSubresource, ImageUsage},
        render_pass::{
            framebuffer::{
                FramebufferAttachmentImageInfo, FramebufferCreateFlags, FramebufferCreateInfo,
            },
            RenderPassBeginInfo,
        },
        registry::StateObject,
        tests::{
            begin_primary, create_framebuffer, create_graphics_pipeline, create_image,
            create_image_view, create_render_pass, handle,
        },
        LayerSettings, ValidationLayer,
    };
    use ash::vk;

    fn imageless_create_info(render_pass: vk::RenderPass) -> FramebufferCreateInfo {
        FramebufferCreateInfo {
            flags: FramebufferCreateFlags::IMAGELESS,
            render_pass,
            attachment_image_infos: vec![FramebufferAttachmentImageInfo {
                usage: ImageUsage::COLOR_ATTACHMENT,
                width: 64,
                height: 64,
                layer_count: 1,
                view_formats: vec![vk::Format::R8G8B8A8_UNORM],
                ..Default::default()
            }],
            width: 64,
            height: 64,
            layers: 1,
            ..Default::default()
        }
    }

    fn imageless_layer() -> (ValidationLayer, std::sync::Arc<crate::CollectingReporter>) {
        let mut device_info = DeviceInfo::default();
        device_info.enabled_features.imageless_framebuffer = true;

        test_layer!(LayerSettings::default(), device_info)
    }

    fn render_area() -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
        }
    }

    fn color_view(layer: &ValidationLayer, format: vk::Format, mip_levels: u32) -> vk::ImageView {
        let image = create_image(
            layer,
            ImageCreateInfo {
                format,
                extent: [64, 64, 1],
                mip_levels,
                usage: ImageUsage::COLOR_ATTACHMENT,
                ..Default::default()
            },
        );

        create_image_view(layer, image, format)
    }

    #[test]
    fn imageless_framebuffers_need_the_feature() {
        let (layer, reporter) = test_layer!();
        let render_pass = create_render_pass(&layer, 1);

        layer.validate_create_framebuffer(&imageless_create_info(render_pass));
        assert!(reporter.contains("VUID-VkFramebufferCreateInfo-flags-03189"));

        let (layer, reporter) = imageless_layer();
        let render_pass = create_render_pass(&layer, 1);

        assert!(!layer.validate_create_framebuffer(&imageless_create_info(render_pass)));
        assert!(reporter.diagnostics().is_empty());
    }

    #[test]
    fn framebuffer_extent_limits() {
        let (layer, reporter) = test_layer!();
        let render_pass = create_render_pass(&layer, 1);

        layer.validate_create_framebuffer(&FramebufferCreateInfo {
            render_pass,
            width: 0,
            height: 64,
            layers: 1,
            ..Default::default()
        });
        assert!(reporter.contains("VUID-VkFramebufferCreateInfo-width-00885"));
    }

    #[test]
    fn destroying_a_render_pass_in_use() {
        let (layer, reporter) = test_layer!();
        let render_pass = create_render_pass(&layer, 2);

        layer
            .registry()
            .render_passes
            .get(render_pass)
            .unwrap()
            .base()
            .begin_use();
        layer.validate_destroy_render_pass(render_pass);
        assert!(reporter.contains("VUID-vkDestroyRenderPass-renderPass-00873"));

        layer.record_destroy_render_pass(render_pass);
        assert!(layer.registry().render_passes.get(render_pass).is_none());
    }

    #[test]
    fn subpass_progression() {
        for end_early in [false, true] {
            let (layer, reporter) = test_layer!();
            let render_pass = create_render_pass(&layer, 2);
            let view = color_view(&layer, vk::Format::R8G8B8A8_UNORM, 1);
            let framebuffer = create_framebuffer(&layer, render_pass, &[view]);
            let pipelines = [
                create_graphics_pipeline(&layer, render_pass, 0),
                create_graphics_pipeline(&layer, render_pass, 1),
            ];
            let cb = begin_primary(&layer);

            let begin_info = RenderPassBeginInfo {
                render_pass,
                framebuffer,
                render_area: render_area(),
                ..Default::default()
            };
            assert!(!layer.validate_cmd_begin_render_pass(cb, &begin_info));
            layer.record_cmd_begin_render_pass(cb, &begin_info, SubpassContents::Inline);

            for (subpass, pipeline) in pipelines.into_iter().enumerate() {
                let bind_point = crate::pipeline::PipelineBindPoint::Graphics;
                assert!(!layer.validate_cmd_bind_pipeline(cb, bind_point, pipeline));
                layer.record_cmd_bind_pipeline(cb, bind_point, pipeline);
                assert!(!layer.validate_cmd_draw(cb));
                layer.record_cmd_draw(cb);

                if subpass == 0 {
                    assert!(!layer.validate_cmd_next_subpass(cb));
                    layer.record_cmd_next_subpass(cb, SubpassContents::Inline);
                }
            }

            assert!(reporter.diagnostics().is_empty());

            if end_early {
                assert!(!layer.validate_cmd_end_render_pass(cb));
                layer.record_cmd_end_render_pass(cb);
                assert!(!layer.validate_end_command_buffer(cb));
                assert!(reporter.diagnostics().is_empty());

                let state = layer.registry().command_buffers.get(cb).unwrap();
                let image = layer.registry().image_views.get(view).unwrap().image.handle();
                let subresource = ImageSubresource {
                    aspect: ImageAspects::COLOR,
                    mip_level: 0,
                    array_layer: 0,
                };
                assert_eq!(
                    state.image_layout(image, &subresource),
                    Some(ImageLayout::General),
                );
            } else {
                layer.validate_cmd_next_subpass(cb);
                assert!(reporter.contains("VUID-vkCmdNextSubpass-None-00909"));
            }
        }
    }

    #[test]
    fn subpass_contents_follow_begin_and_next_subpass() {
        let (layer, reporter) = test_layer!();
        let render_pass = create_render_pass(&layer, 2);
        let view = color_view(&layer, vk::Format::R8G8B8A8_UNORM, 1);
        let framebuffer = create_framebuffer(&layer, render_pass, &[view]);
        let pipeline = create_graphics_pipeline(&layer, render_pass, 1);
        let cb = begin_primary(&layer);

        let begin_info = RenderPassBeginInfo {
            render_pass,
            framebuffer,
            render_area: render_area(),
            ..Default::default()
        };
        assert!(!layer.validate_cmd_begin_render_pass(cb, &begin_info));
        layer.record_cmd_begin_render_pass(
            cb,
            &begin_info,
            SubpassContents::SecondaryCommandBuffers,
        );

        layer.validate_cmd_execute_commands(cb, &[]);
        assert!(!reporter.contains("VUID-vkCmdExecuteCommands-contents-06018"));
        layer.validate_cmd_draw(cb);
        assert!(reporter.contains("UNASSIGNED-CoreValidation-DrawState-InvalidSubpassContents"));
        reporter.clear();

        assert!(!layer.validate_cmd_next_subpass(cb));
        layer.record_cmd_next_subpass(cb, SubpassContents::Inline);

        layer.validate_cmd_execute_commands(cb, &[]);
        assert!(reporter.contains("VUID-vkCmdExecuteCommands-contents-06018"));
        reporter.clear();

        let bind_point = crate::pipeline::PipelineBindPoint::Graphics;
        assert!(!layer.validate_cmd_bind_pipeline(cb, bind_point, pipeline));
        layer.record_cmd_bind_pipeline(cb, bind_point, pipeline);
        assert!(!layer.validate_cmd_draw(cb));
        assert!(reporter.diagnostics().is_empty());
    }

    #[test]
    fn ending_before_the_last_subpass() {
        let (layer, reporter) = test_layer!();
        let render_pass = create_render_pass(&layer, 2);
        let view = color_view(&layer, vk::Format::R8G8B8A8_UNORM, 1);
        let framebuffer = create_framebuffer(&layer, render_pass, &[view]);
        let cb = begin_primary(&layer);

        let begin_info = RenderPassBeginInfo {
            render_pass,
            framebuffer,
            render_area: render_area(),
            ..Default::default()
        };
        layer.record_cmd_begin_render_pass(cb, &begin_info, SubpassContents::Inline);
        layer.validate_cmd_end_render_pass(cb);
        assert!(reporter.contains("VUID-vkCmdEndRenderPass-None-00910"));

        // A second instance cannot begin inside the first.
        layer.validate_cmd_begin_render_pass(cb, &begin_info);
        assert!(reporter.contains("VUID-vkCmdBeginRenderPass-renderpass"));
    }

    #[test]
    fn render_area_outside_the_framebuffer() {
        let (layer, reporter) = test_layer!();
        let render_pass = create_render_pass(&layer, 1);
        let view = color_view(&layer, vk::Format::R8G8B8A8_UNORM, 1);
        let framebuffer = create_framebuffer(&layer, render_pass, &[view]);
        let cb = begin_primary(&layer);

        let mut render_area = render_area();
        render_area.offset.x = 8;
        layer.validate_cmd_begin_render_pass(
            cb,
            &RenderPassBeginInfo {
                render_pass,
                framebuffer,
                render_area,
                ..Default::default()
            },
        );

        assert!(reporter.contains("VUID-VkRenderPassBeginInfo-pNext-02852"));
        assert!(!reporter.contains("VUID-VkRenderPassBeginInfo-pNext-02853"));
    }

    #[test]
    fn imageless_begin_checks_views() {
        let (layer, reporter) = imageless_layer();
        let render_pass = create_render_pass(&layer, 1);
        let framebuffer = handle();
        let create_info = imageless_create_info(render_pass);
        assert!(!layer.validate_create_framebuffer(&create_info));
        layer.record_create_framebuffer(framebuffer, create_info);

        let begin = |view| {
            let cb = begin_primary(&layer);
            layer.validate_cmd_begin_render_pass(
                cb,
                &RenderPassBeginInfo {
                    render_pass,
                    framebuffer,
                    render_area: render_area(),
                    attachments: vec![view],
                    ..Default::default()
                },
            )
        };

        let unorm = color_view(&layer, vk::Format::R8G8B8A8_UNORM, 1);
        assert!(!begin(unorm));
        assert!(reporter.diagnostics().is_empty());

        // The view format is checked against the framebuffer before the render pass.
        let srgb = color_view(&layer, vk::Format::R8G8B8A8_SRGB, 1);
        begin(srgb);
        assert!(reporter.contains("VUID-VkRenderPassBeginInfo-framebuffer-03215"));
        assert!(!reporter.contains("VUID-VkRenderPassBeginInfo-framebuffer-03216"));
        reporter.clear();

        let mipmapped = color_view(&layer, vk::Format::R8G8B8A8_UNORM, 2);
        begin(mipmapped);
        assert!(reporter.contains("VUID-VkRenderPassAttachmentBeginInfo-pAttachments-03218"));
    }
}
