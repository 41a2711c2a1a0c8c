use iocraft::prelude::*;
use tokio::sync::watch;
use upld::UploadConfig;

#[derive(Default, Props)]
pub struct ProgressBarProps {
    pub title: String,
    pub progress: Option<watch::Receiver<u8>>,
}

#[component]
pub fn ProgressBar(props: &ProgressBarProps, mut hooks: Hooks) -> impl Into<AnyElement<'static>> {
    let mut progress = hooks.use_state(|| 0u8);
    let receiver = props.progress.clone();

    hooks.use_future(async move {
        let Some(mut receiver) = receiver else {
            return;
        };
        while receiver.changed().await.is_ok() {
            let value = *receiver.borrow_and_update();
            progress.set(value);
        }
    });

    let percent = progress.get();

    element! {
        View(flex_direction: FlexDirection::Column) {
            View(flex_direction: FlexDirection::Row) {
                Text(weight: Weight::Bold, content: &props.title)
                Text(content: format!(" {}%", percent))
            }
            View(border_style: BorderStyle::Round, border_color: Color::Blue, width: 60) {
                View(width: Percent(f32::from(percent)), height: 1, background_color: Color::Green)
            }
        }
    }
}

#[derive(Default, Props)]
pub struct ProfileListProps {
    pub profiles: Vec<(String, UploadConfig)>,
    pub default_profile: String,
}

#[component]
pub fn ProfileList(props: &ProfileListProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Column) {
            #(props.profiles.iter().map(|(name, endpoints)| {
                let marker = if *name == props.default_profile { "◆" } else { "◇" };
                element! {
                    View(flex_direction: FlexDirection::Column, margin_bottom: 1) {
                        View(flex_direction: FlexDirection::Row) {
                            Text(color: Color::Green, content: format!("{} ", marker))
                            Text(weight: Weight::Bold, content: name.clone())
                        }
                        Text(content: format!("│ direct    {}", endpoints.direct_upload))
                        Text(content: format!("│ initiate  {}", endpoints.initiate_multipart))
                        Text(content: format!("│ verify    {}", endpoints.verify_part))
                        Text(content: format!("└ complete  {}", endpoints.complete_multipart))
                    }
                }
            }))
        }
    }
}

#[derive(Default, Props)]
pub struct PartPlanProps {
    pub parts: Vec<(u32, u64, u64)>,
}

#[component]
pub fn PartPlanTable(props: &PartPlanProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Column) {
            View(flex_direction: FlexDirection::Row) {
                View(width: 8) { Text(weight: Weight::Bold, content: "PART") }
                View(width: 16) { Text(weight: Weight::Bold, content: "START") }
                View(width: 16) { Text(weight: Weight::Bold, content: "END") }
                Text(weight: Weight::Bold, content: "BYTES")
            }
            #(props.parts.iter().map(|(part_number, start, end)| {
                element! {
                    View(flex_direction: FlexDirection::Row) {
                        View(width: 8) { Text(content: part_number.to_string()) }
                        View(width: 16) { Text(content: start.to_string()) }
                        View(width: 16) { Text(content: end.to_string()) }
                        Text(content: (end - start).to_string())
                    }
                }
            }))
        }
    }
}

#[component]
pub fn ConfigHeader() -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Column, margin_bottom: 1) {
            View(background_color: Color::Blue) {
                Text(color: Color::White, weight: Weight::Bold, content: " upld configuration ")
            }
            Text(content: "Press enter to accept the value in brackets.")
        }
    }
}

#[derive(Default, Props)]
pub struct InputPromptProps {
    pub prompt: String,
    pub default: Option<String>,
    pub description: Option<String>,
}

#[component]
pub fn InputPrompt(props: &InputPromptProps) -> impl Into<AnyElement<'static>> {
    let prompt = match &props.default {
        Some(default) => format!("{} [{}]", props.prompt, default),
        None => props.prompt.clone(),
    };

    element! {
        View(flex_direction: FlexDirection::Column) {
            Text(weight: Weight::Bold, content: prompt)
            #(props.description.as_ref().map(|description| element! {
                Text(color: Color::Grey, content: description.clone())
            }))
        }
    }
}

#[derive(Default, Props)]
pub struct MessageProps {
    pub message: String,
}

#[component]
pub fn SuccessMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Green, content: "◆ ")
            Text(content: &props.message)
        }
    }
}

#[component]
pub fn ErrorMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Red, content: "▲ ")
            Text(content: &props.message)
        }
    }
}
